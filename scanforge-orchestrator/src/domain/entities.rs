//! Orchestrator domain entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scanforge_core::domain::{CoverageResult, FindingObservation, TechnologyObservation};

use super::value_objects::{
    ExecutionOutcome, JobStatus, JobTransition, JobTransitionError, ScanMode,
};

/// One tracked asynchronous unit of work.
///
/// Owned exclusively by the job queue and mutated only under its internal
/// lock; everything handed out to callers is a clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Monotonic id assigned at submission
    pub id: u64,
    /// Caller-supplied type tag ("scan", "scheduler-pass", "project-save", ...)
    pub job_type: String,
    pub status: JobStatus,
    /// Exclusive jobs run alone: nothing else starts while one runs or
    /// sits at the queue head
    pub exclusive: bool,
    pub cancel_requested: bool,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Audit trail of every status change
    pub transitions: Vec<JobTransition>,
}

impl Job {
    pub fn new(id: u64, job_type: impl Into<String>, payload: serde_json::Value, exclusive: bool) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            status: JobStatus::Queued,
            exclusive,
            cancel_requested: false,
            cancel_reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            payload,
            result: None,
            error: None,
            transitions: Vec::new(),
        }
    }

    /// Validated status transition; records the audit-trail entry.
    pub fn transition(
        &mut self,
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobTransitionError> {
        if !self.status.can_transition_to(&to) {
            return Err(JobTransitionError {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        self.transitions.push(JobTransition {
            from: self.status,
            to,
            timestamp: now,
            reason,
        });
        match to {
            JobStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.status = to;
        Ok(())
    }
}

/// One candidate action proposed by the planner for a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Tool identifier, matched case-insensitively against attempted sets
    pub tool_id: String,
    pub label: String,
    /// Command template; rendering it into an argv is the caller's concern
    pub command_template: String,
    #[serde(default)]
    pub danger_categories: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    /// Family used for pre-approval lookups ("nmap", "nuclei", ...)
    pub family_id: Option<String>,
    pub rationale: Option<String>,
    #[serde(default)]
    pub mode: ScanMode,
    pub goal_profile: Option<String>,
    /// Planner-assigned ranking score
    pub score: f64,
}

/// Evidence context handed to the planner with each request.
///
/// Explicit optional fields plus one raw escape hatch, rather than an
/// untyped map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Service banner or metadata, when known
    pub service_banner: Option<String>,
    /// Recent tool output, truncated to the pass's char budget
    pub recent_output: Option<String>,
    #[serde(default)]
    pub technologies: Vec<TechnologyObservation>,
    #[serde(default)]
    pub known_cves: Vec<String>,
    pub coverage: Option<CoverageResult>,
    /// Raw pass-through payload for planner-specific extras
    pub raw: Option<serde_json::Value>,
}

/// Durable record of one executed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: Uuid,
    /// Owning job, when the process was registered under one
    pub job_id: Option<u64>,
    pub tool_id: String,
    pub command: String,
    pub status: ProcessRecordStatus,
    /// Combined output captured so far; overwritten on each snapshot
    pub output: String,
    pub progress_percent: Option<f64>,
    pub remaining_seconds: Option<u64>,
    pub elapsed_seconds: u64,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal reason text, from [`ExecutionOutcome::reason`]
    pub reason: Option<String>,
}

/// Lifecycle of a durable process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRecordStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
    Killed,
}

impl From<&ExecutionOutcome> for ProcessRecordStatus {
    fn from(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::TimedOut => Self::TimedOut,
            ExecutionOutcome::Killed { .. } => Self::Killed,
            ExecutionOutcome::Failed { .. } => Self::Failed,
            ExecutionOutcome::Completed => Self::Completed,
        }
    }
}

/// Result of one completed tool run, as persisted by the script store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResult {
    pub tool_id: String,
    pub host_ip: String,
    pub port: u16,
    pub protocol: String,
    pub output: String,
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// A pending approval for a dangerous action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub host_ip: String,
    pub port: u16,
    pub protocol: String,
    pub action: PlannedAction,
    pub queued_at: DateTime<Utc>,
    pub decided: Option<bool>,
}

/// One appended decision-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub host_ip: String,
    pub port: u16,
    pub protocol: String,
    pub tool_id: String,
    pub timestamp: DateTime<Utc>,
    pub rationale: Option<String>,
    /// Approval linkage for actions that were queued instead of run
    pub approval_id: Option<Uuid>,
}

/// A value with a 0-100 confidence attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guess {
    pub value: String,
    pub confidence: u8,
}

impl Guess {
    pub fn unknown() -> Self {
        Self {
            value: "unknown".to_string(),
            confidence: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.value.eq_ignore_ascii_case("unknown") || self.value.is_empty()
    }
}

/// Per-host derived state persisted across scheduling rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostState {
    pub host_ip: String,
    pub hostname: Guess,
    pub operating_system: Guess,
    pub technologies: Vec<TechnologyObservation>,
    pub findings: Vec<FindingObservation>,
    pub manual_test_suggestions: Vec<String>,
    /// Raw pass-through payload preserved verbatim
    pub raw: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl HostState {
    pub fn empty(host_ip: impl Into<String>) -> Self {
        Self {
            host_ip: host_ip.into(),
            hostname: Guess::unknown(),
            operating_system: Guess::unknown(),
            technologies: Vec::new(),
            findings: Vec::new(),
            manual_test_suggestions: Vec::new(),
            raw: None,
            updated_at: Utc::now(),
        }
    }

    /// Overwrite a guess only when the prior value is unknown and the new
    /// confidence clears the floor.
    pub fn consider_hostname(&mut self, candidate: Guess) {
        if self.hostname.is_unknown() && candidate.confidence >= 70 {
            self.hostname = candidate;
        }
    }

    /// Same rule as [`Self::consider_hostname`], for the OS guess.
    pub fn consider_os(&mut self, candidate: Guess) {
        if self.operating_system.is_unknown() && candidate.confidence >= 70 {
            self.operating_system = candidate;
        }
    }
}
