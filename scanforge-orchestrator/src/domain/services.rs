//! Contracts for external collaborators
//!
//! The scheduler consumes these; their implementations (decision engine,
//! approval persistence, durable stores) live outside this crate. Every
//! call is fallible, and the scheduler degrades by skipping the affected
//! target or round rather than aborting the pass.

use async_trait::async_trait;
use uuid::Uuid;

use scanforge_core::domain::Target;

use super::entities::{
    DecisionContext, DecisionLogEntry, HostState, PendingApproval, PlannedAction, ProcessRecord,
    ScriptResult,
};
use super::value_objects::ScanMode;

/// Error surfaced by any external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Planner settings forwarded with each request.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub mode: ScanMode,
    pub goal_profile: Option<String>,
}

/// Proposes candidate actions for a target. The scoring algorithm behind
/// the ranking is entirely the implementation's concern.
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    async fn plan_actions(
        &self,
        target: &Target,
        settings: &PlannerSettings,
        context: &DecisionContext,
        excluded_tool_ids: &[String],
        limit: usize,
    ) -> Result<Vec<PlannedAction>, CollaboratorError>;
}

/// Persistence for actions awaiting human approval.
#[async_trait]
pub trait ApprovalQueue: Send + Sync {
    async fn queue(&self, approval: PendingApproval) -> Result<(), CollaboratorError>;

    async fn get(&self, id: Uuid) -> Result<Option<PendingApproval>, CollaboratorError>;

    async fn list_pending(&self) -> Result<Vec<PendingApproval>, CollaboratorError>;

    async fn update(&self, id: Uuid, approved: bool) -> Result<(), CollaboratorError>;

    /// Whether a tool family has a standing pre-approval.
    async fn family_preapproved(&self, family_id: &str) -> Result<bool, CollaboratorError>;
}

/// Append-only decision log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: DecisionLogEntry) -> Result<(), CollaboratorError>;
}

/// Per-host derived state persisted across rounds and passes.
#[async_trait]
pub trait HostStateStore: Send + Sync {
    async fn get(&self, host_ip: &str) -> Result<Option<HostState>, CollaboratorError>;

    async fn upsert(&self, state: HostState) -> Result<(), CollaboratorError>;

    async fn delete(&self, host_ip: &str) -> Result<(), CollaboratorError>;
}

/// Durable record per executed command.
#[async_trait]
pub trait ProcessRecordStore: Send + Sync {
    async fn create(&self, record: ProcessRecord) -> Result<(), CollaboratorError>;

    /// Last-writer-wins snapshot overwrite; called at a throttled cadence
    /// while the process runs and once more at completion.
    async fn save_snapshot(&self, record: ProcessRecord) -> Result<(), CollaboratorError>;

    async fn get(&self, id: Uuid) -> Result<Option<ProcessRecord>, CollaboratorError>;

    /// Tool ids of prior records against the given target.
    async fn attempted_tools(&self, target: &Target) -> Result<Vec<String>, CollaboratorError>;
}

/// Durable record per completed tool result.
#[async_trait]
pub trait ScriptResultStore: Send + Sync {
    async fn record(&self, result: ScriptResult) -> Result<(), CollaboratorError>;

    async fn attempted_tools(&self, target: &Target) -> Result<Vec<String>, CollaboratorError>;
}

/// Supplies targets in the underlying store's natural order: all hosts,
/// then open ports per host. Deterministic for one snapshot.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    async fn targets(&self) -> Result<Vec<Target>, CollaboratorError>;
}
