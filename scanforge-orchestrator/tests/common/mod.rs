//! In-memory collaborator implementations for integration tests

pub mod fixtures;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use scanforge_core::domain::Target;
use scanforge_orchestrator::domain::entities::{
    DecisionContext, DecisionLogEntry, HostState, PendingApproval, PlannedAction, ProcessRecord,
    ScriptResult,
};
use scanforge_orchestrator::domain::services::{
    ActionPlanner, ApprovalQueue, AuditSink, CollaboratorError, HostStateStore, PlannerSettings,
    ProcessRecordStore, ScriptResultStore, TargetCatalog,
};

/// Planner that replays a scripted sequence of responses, one per call.
/// Once the script is exhausted it proposes nothing.
#[derive(Default)]
pub struct ScriptedPlanner {
    responses: Mutex<VecDeque<Vec<PlannedAction>>>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedPlanner {
    pub fn new(responses: Vec<Vec<PlannedAction>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Excluded tool ids seen on the nth call.
    pub fn excluded_on_call(&self, n: usize) -> Vec<String> {
        self.calls.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl ActionPlanner for ScriptedPlanner {
    async fn plan_actions(
        &self,
        _target: &Target,
        _settings: &PlannerSettings,
        _context: &DecisionContext,
        excluded_tool_ids: &[String],
        limit: usize,
    ) -> Result<Vec<PlannedAction>, CollaboratorError> {
        self.calls.lock().unwrap().push(excluded_tool_ids.to_vec());
        let mut responses = self.responses.lock().unwrap();
        let mut batch = responses.pop_front().unwrap_or_default();
        batch.truncate(limit);
        Ok(batch)
    }
}

#[derive(Default)]
pub struct MemoryApprovals {
    pub queued: Mutex<Vec<PendingApproval>>,
    pub preapproved_families: Mutex<HashSet<String>>,
}

impl MemoryApprovals {
    pub fn preapprove_family(&self, family: &str) {
        self.preapproved_families
            .lock()
            .unwrap()
            .insert(family.to_string());
    }
}

#[async_trait]
impl ApprovalQueue for MemoryApprovals {
    async fn queue(&self, approval: PendingApproval) -> Result<(), CollaboratorError> {
        self.queued.lock().unwrap().push(approval);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingApproval>, CollaboratorError> {
        Ok(self
            .queued
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<PendingApproval>, CollaboratorError> {
        Ok(self
            .queued
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.decided.is_none())
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, approved: bool) -> Result<(), CollaboratorError> {
        let mut queued = self.queued.lock().unwrap();
        match queued.iter_mut().find(|a| a.id == id) {
            Some(approval) => {
                approval.decided = Some(approved);
                Ok(())
            }
            None => Err(CollaboratorError::InvalidRequest(format!(
                "no approval {id}"
            ))),
        }
    }

    async fn family_preapproved(&self, family_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self
            .preapproved_families
            .lock()
            .unwrap()
            .contains(family_id))
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    pub entries: Mutex<Vec<DecisionLogEntry>>,
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn append(&self, entry: DecisionLogEntry) -> Result<(), CollaboratorError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHostState {
    pub states: Mutex<HashMap<String, HostState>>,
}

#[async_trait]
impl HostStateStore for MemoryHostState {
    async fn get(&self, host_ip: &str) -> Result<Option<HostState>, CollaboratorError> {
        Ok(self.states.lock().unwrap().get(host_ip).cloned())
    }

    async fn upsert(&self, state: HostState) -> Result<(), CollaboratorError> {
        self.states
            .lock()
            .unwrap()
            .insert(state.host_ip.clone(), state);
        Ok(())
    }

    async fn delete(&self, host_ip: &str) -> Result<(), CollaboratorError> {
        self.states.lock().unwrap().remove(host_ip);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProcessRecords {
    pub records: Mutex<HashMap<Uuid, ProcessRecord>>,
    pub snapshot_calls: Mutex<usize>,
}

impl MemoryProcessRecords {
    pub fn get_record(&self, id: Uuid) -> Option<ProcessRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn snapshot_count(&self) -> usize {
        *self.snapshot_calls.lock().unwrap()
    }
}

#[async_trait]
impl ProcessRecordStore for MemoryProcessRecords {
    async fn create(&self, record: ProcessRecord) -> Result<(), CollaboratorError> {
        self.records.lock().unwrap().insert(record.id, record);
        Ok(())
    }

    async fn save_snapshot(&self, record: ProcessRecord) -> Result<(), CollaboratorError> {
        *self.snapshot_calls.lock().unwrap() += 1;
        self.records.lock().unwrap().insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProcessRecord>, CollaboratorError> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn attempted_tools(&self, _target: &Target) -> Result<Vec<String>, CollaboratorError> {
        // The in-memory store does not track targets per record; the
        // script store carries the per-target attempted set in tests
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct MemoryScriptResults {
    pub results: Mutex<Vec<ScriptResult>>,
}

#[async_trait]
impl ScriptResultStore for MemoryScriptResults {
    async fn record(&self, result: ScriptResult) -> Result<(), CollaboratorError> {
        self.results.lock().unwrap().push(result);
        Ok(())
    }

    async fn attempted_tools(&self, target: &Target) -> Result<Vec<String>, CollaboratorError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.host_ip == target.host_ip
                    && r.port == target.port
                    && r.protocol == target.protocol
            })
            .map(|r| r.tool_id.clone())
            .collect())
    }
}

pub struct MemoryTargets {
    pub targets: Vec<Target>,
}

#[async_trait]
impl TargetCatalog for MemoryTargets {
    async fn targets(&self) -> Result<Vec<Target>, CollaboratorError> {
        Ok(self.targets.clone())
    }
}
