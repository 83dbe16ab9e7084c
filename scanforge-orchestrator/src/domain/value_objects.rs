//! Orchestrator value objects

use serde::{Deserialize, Serialize};

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue
    Queued,
    /// Job is currently running on a worker
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed
    Failed,
    /// Job was cancelled before completion
    Cancelled,
}

impl JobStatus {
    /// Returns the set of valid target states from the current state.
    ///
    /// ```text
    /// Queued ──► Running ──► Completed
    ///   │           │
    ///   │           ├──────► Failed
    ///   └──────────►└──────► Cancelled
    /// ```
    pub fn valid_transitions(&self) -> &[JobStatus] {
        match self {
            Self::Queued => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Check whether transitioning to `target` is allowed from the current state.
    pub fn can_transition_to(&self, target: &JobStatus) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Whether this status represents a terminal (final) state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Recorded state transition for a job (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Human-readable reason or context for the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an invalid status transition is attempted.
#[derive(Debug, thiserror::Error)]
#[error("Invalid job transition from {from} to {to}")]
pub struct JobTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// How a tracked process ended.
///
/// The variants are ordered by attribution precedence: a timeout beats a
/// kill observed in the same poll cycle, a kill beats a plain non-zero
/// exit, and success is only claimed when nothing else applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ExecutionOutcome {
    /// Wall-clock timeout; the process group was force-killed
    TimedOut,
    /// Killed on request (explicit kill or cooperative cancellation)
    Killed { reason: String },
    /// Exited on its own with a non-zero code
    Failed { exit_code: Option<i32> },
    /// Exited zero
    Completed,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Short reason text recorded on the durable process record.
    pub fn reason(&self) -> String {
        match self {
            Self::TimedOut => "timeout".to_string(),
            Self::Killed { reason } => format!("killed: {}", reason),
            Self::Failed { exit_code: Some(code) } => format!("exit code {}", code),
            Self::Failed { exit_code: None } => "terminated by signal".to_string(),
            Self::Completed => "completed".to_string(),
        }
    }
}

/// Scan mode requested for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Standard,
    DeepAnalysis,
}

/// Per-pass round budget. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundBudget {
    /// Rounds per target (1-12)
    pub max_rounds: u32,
    /// Candidate actions per round (1-8)
    pub max_actions_per_round: u32,
    /// Recent-output characters forwarded to the planner (320-4000)
    pub recent_output_char_budget: usize,
}

impl RoundBudget {
    pub const MIN_ROUNDS: u32 = 1;
    pub const MAX_ROUNDS: u32 = 12;
    pub const MIN_ACTIONS: u32 = 1;
    pub const MAX_ACTIONS: u32 = 8;
    pub const MIN_OUTPUT_CHARS: usize = 320;
    pub const MAX_OUTPUT_CHARS: usize = 4000;

    /// Build a budget with every field clamped into its allowed range.
    pub fn clamped(max_rounds: u32, max_actions_per_round: u32, recent_output_chars: usize) -> Self {
        Self {
            max_rounds: max_rounds.clamp(Self::MIN_ROUNDS, Self::MAX_ROUNDS),
            max_actions_per_round: max_actions_per_round.clamp(Self::MIN_ACTIONS, Self::MAX_ACTIONS),
            recent_output_char_budget: recent_output_chars
                .clamp(Self::MIN_OUTPUT_CHARS, Self::MAX_OUTPUT_CHARS),
        }
    }

    /// Deep-analysis requests widen the floors so a narrow configured
    /// budget cannot starve a dig-deeper pass.
    pub fn widened_for(self, mode: ScanMode) -> Self {
        match mode {
            ScanMode::Standard => self,
            ScanMode::DeepAnalysis => Self::clamped(
                self.max_rounds.max(4),
                self.max_actions_per_round.max(4),
                self.recent_output_char_budget.max(2000),
            ),
        }
    }
}
