//! Test data fixtures

use std::sync::Arc;

use scanforge_core::config::{ExecutionConfig, SchedulerConfig};
use scanforge_core::domain::Target;
use scanforge_orchestrator::domain::entities::PlannedAction;
use scanforge_orchestrator::domain::value_objects::ScanMode;
use scanforge_orchestrator::infrastructure::process::{
    ActiveProcessRegistry, TrackedProcessExecutor,
};

use super::MemoryProcessRecords;

pub fn web_target() -> Target {
    Target::new("10.0.0.5", 8080, "tcp", "http")
}

/// A fast-polling execution config so tests finish quickly.
pub fn fast_execution_config() -> ExecutionConfig {
    ExecutionConfig {
        default_timeout_seconds: 30,
        poll_interval_ms: 20,
        snapshot_interval_ms: 100,
        kill_grace_ms: 300,
        stream_grace_seconds: 1,
        max_output_bytes: 64 * 1024,
    }
}

pub fn small_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        max_rounds: 3,
        max_actions_per_round: 4,
        recent_output_char_budget: 1600,
        concurrency: 2,
        pass_max_actions: 16,
        pass_max_seconds: 120,
    }
}

pub fn executor_with(
    records: Arc<MemoryProcessRecords>,
) -> (Arc<TrackedProcessExecutor>, Arc<ActiveProcessRegistry>) {
    let registry = Arc::new(ActiveProcessRegistry::new());
    let executor = Arc::new(TrackedProcessExecutor::new(
        records,
        registry.clone(),
        fast_execution_config(),
    ));
    (executor, registry)
}

/// An action that just echoes the given text.
pub fn echo_action(tool_id: &str, text: &str) -> PlannedAction {
    PlannedAction {
        tool_id: tool_id.to_string(),
        label: format!("echo for {tool_id}"),
        command_template: format!("echo {text}"),
        danger_categories: vec![],
        requires_approval: false,
        family_id: None,
        rationale: Some("test action".to_string()),
        mode: ScanMode::Standard,
        goal_profile: None,
        score: 1.0,
    }
}

/// An action flagged as requiring human approval.
pub fn dangerous_action(tool_id: &str, family: Option<&str>) -> PlannedAction {
    PlannedAction {
        requires_approval: true,
        danger_categories: vec!["intrusive".to_string()],
        family_id: family.map(str::to_string),
        ..echo_action(tool_id, "dangerous output")
    }
}
