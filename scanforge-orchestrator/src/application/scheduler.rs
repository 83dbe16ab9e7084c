//! Adaptive scheduling loop
//!
//! Per target: plan, execute, observe, replan. Each round asks the planner
//! for candidates, hands approval-required actions to the approval queue,
//! runs the rest concurrently through the tracked executor, mines the
//! output for evidence, and folds the result back into the next round's
//! context. Every collaborator call is fallible and degrades by skipping
//! the affected target or round.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scanforge_core::config::SchedulerConfig;
use scanforge_core::domain::evidence::{
    EvidenceReport, extract_findings, extract_host_guesses, extract_technologies,
    fallback_technology, merge_findings, merge_technologies,
};
use scanforge_core::domain::{
    CoverageMode, CoverageRequest, CoverageResult, Target, analyze_coverage,
};

use crate::domain::entities::{
    DecisionContext, DecisionLogEntry, Guess, HostState, PendingApproval, PlannedAction,
    ScriptResult,
};
use crate::domain::services::{
    ActionPlanner, ApprovalQueue, AuditSink, HostStateStore, PlannerSettings, ProcessRecordStore,
    ScriptResultStore, TargetCatalog,
};
use crate::domain::value_objects::{RoundBudget, ScanMode};
use crate::infrastructure::process::{CommandSpec, JobBinding, TrackedProcessExecutor};

/// External collaborators consumed by the scheduler.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub planner: Arc<dyn ActionPlanner>,
    pub approvals: Arc<dyn ApprovalQueue>,
    pub audit: Arc<dyn AuditSink>,
    pub host_state: Arc<dyn HostStateStore>,
    pub records: Arc<dyn ProcessRecordStore>,
    pub scripts: Arc<dyn ScriptResultStore>,
    pub targets: Arc<dyn TargetCatalog>,
}

/// One pass request, as carried in a job payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct PassRequest {
    #[serde(default)]
    pub mode: ScanMode,
    /// Restrict the pass to a single target (run-now / dig-deeper triggers)
    pub only_target: Option<Target>,
}

/// Counters reported when a pass finishes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PassReport {
    pub targets_visited: usize,
    pub rounds_run: u32,
    pub actions_executed: u32,
    pub actions_queued_for_approval: u32,
    pub evidence_updates: u32,
    pub cancelled: bool,
}

struct RoundOutcome {
    executed: u32,
    queued_for_approval: u32,
    evidence_changed: bool,
}

/// The plan → execute → observe → replan engine.
#[derive(Clone)]
pub struct AdaptiveScheduler {
    deps: SchedulerDeps,
    executor: Arc<TrackedProcessExecutor>,
    config: SchedulerConfig,
}

impl AdaptiveScheduler {
    pub fn new(
        deps: SchedulerDeps,
        executor: Arc<TrackedProcessExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            deps,
            executor,
            config,
        }
    }

    fn budget_for(&self, mode: ScanMode) -> RoundBudget {
        RoundBudget::clamped(
            self.config.max_rounds,
            self.config.max_actions_per_round,
            self.config.recent_output_char_budget,
        )
        .widened_for(mode)
    }

    /// Run one full pass. The pass itself is expected to be a job runner:
    /// `cancel` is the job's token and `job_id` is used to register spawned
    /// processes so a stop-job request reaches them.
    pub async fn run_pass(
        &self,
        request: PassRequest,
        job_id: Option<u64>,
        cancel: CancellationToken,
    ) -> PassReport {
        let budget = self.budget_for(request.mode);
        let started = Instant::now();
        let mut report = PassReport::default();

        let targets = match &request.only_target {
            Some(target) => vec![target.clone()],
            None => match self.deps.targets.targets().await {
                Ok(targets) => targets,
                Err(err) => {
                    warn!(error = %err, "Target catalog unavailable; nothing to schedule");
                    return report;
                }
            },
        };

        info!(
            targets = targets.len(),
            mode = ?request.mode,
            max_rounds = budget.max_rounds,
            "Scheduling pass started"
        );

        for target in targets {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.pass_budget_exhausted(&report, started) {
                debug!("Pass budget exhausted; stopping early");
                break;
            }

            report.targets_visited += 1;
            self.run_target_rounds(
                &target,
                request.mode,
                budget,
                job_id,
                &cancel,
                started,
                &mut report,
            )
            .await;
        }

        info!(
            targets_visited = report.targets_visited,
            actions_executed = report.actions_executed,
            approvals_queued = report.actions_queued_for_approval,
            cancelled = report.cancelled,
            "Scheduling pass finished"
        );
        report
    }

    fn pass_budget_exhausted(&self, report: &PassReport, started: Instant) -> bool {
        (self.config.pass_max_actions > 0 && report.actions_executed >= self.config.pass_max_actions)
            || (self.config.pass_max_seconds > 0
                && started.elapsed().as_secs() >= self.config.pass_max_seconds)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_target_rounds(
        &self,
        target: &Target,
        mode: ScanMode,
        budget: RoundBudget,
        job_id: Option<u64>,
        cancel: &CancellationToken,
        pass_started: Instant,
        report: &mut PassReport,
    ) {
        // Output mined during this pass, newest last; the planner sees the
        // tail of it up to the char budget
        let mut recent_output = String::new();

        for round in 1..=budget.max_rounds {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            if self.pass_budget_exhausted(report, pass_started) {
                return;
            }

            report.rounds_run += 1;
            let outcome = self
                .run_round(target, mode, budget, job_id, cancel, &mut recent_output)
                .await;

            report.actions_executed += outcome.executed;
            report.actions_queued_for_approval += outcome.queued_for_approval;
            if outcome.evidence_changed {
                report.evidence_updates += 1;
            }

            // A round that neither ran anything nor learned anything ends
            // the target early
            if outcome.executed == 0 && !outcome.evidence_changed {
                debug!(target = %target, round, "Zero-progress round; leaving target");
                return;
            }
        }
    }

    async fn run_round(
        &self,
        target: &Target,
        mode: ScanMode,
        budget: RoundBudget,
        job_id: Option<u64>,
        cancel: &CancellationToken,
        recent_output: &mut String,
    ) -> RoundOutcome {
        let mut outcome = RoundOutcome {
            executed: 0,
            queued_for_approval: 0,
            evidence_changed: false,
        };

        let attempted = self.attempted_tools(target).await;
        let state = self.host_state_for(target).await;
        let context = self.build_context(target, mode, &attempted, &state, recent_output, budget);

        let settings = PlannerSettings {
            mode,
            goal_profile: None,
        };
        let excluded: Vec<String> = attempted.iter().cloned().collect();
        let actions = match self
            .deps
            .planner
            .plan_actions(
                target,
                &settings,
                &context,
                &excluded,
                budget.max_actions_per_round as usize,
            )
            .await
        {
            Ok(actions) => actions,
            Err(err) => {
                warn!(target = %target, error = %err, "Planner unavailable; skipping round");
                return outcome;
            }
        };

        // Partition: approval-required actions leave the round entirely
        let mut chosen_this_round: BTreeSet<String> = BTreeSet::new();
        let mut executable = Vec::new();
        for action in actions {
            let tool_key = action.tool_id.to_lowercase();
            if attempted.contains(&tool_key) || !chosen_this_round.insert(tool_key) {
                continue;
            }
            if executable.len() + outcome.queued_for_approval as usize
                >= budget.max_actions_per_round as usize
            {
                break;
            }

            if self.needs_approval(&action).await {
                outcome.queued_for_approval += 1;
                self.queue_approval(target, action).await;
            } else {
                executable.push(action);
            }
        }

        if executable.is_empty() {
            return outcome;
        }

        let results = self
            .execute_batch(target, executable, job_id, cancel)
            .await;

        for (action, output) in results {
            outcome.executed += 1;
            if let Some(output) = output {
                append_recent(recent_output, &output, budget.recent_output_char_budget);
                if self.absorb_output(target, &action.tool_id, &output).await {
                    outcome.evidence_changed = true;
                }
            }
        }

        outcome
    }

    /// Union of tool ids already tried against the target, lower-cased:
    /// prior script results, prior process records, and pending approvals.
    async fn attempted_tools(&self, target: &Target) -> BTreeSet<String> {
        let mut attempted = BTreeSet::new();

        match self.deps.scripts.attempted_tools(target).await {
            Ok(ids) => attempted.extend(ids.into_iter().map(|id| id.to_lowercase())),
            Err(err) => warn!(target = %target, error = %err, "Script store unavailable"),
        }
        match self.deps.records.attempted_tools(target).await {
            Ok(ids) => attempted.extend(ids.into_iter().map(|id| id.to_lowercase())),
            Err(err) => warn!(target = %target, error = %err, "Process record store unavailable"),
        }
        match self.deps.approvals.list_pending().await {
            Ok(pending) => attempted.extend(
                pending
                    .into_iter()
                    .filter(|p| {
                        p.host_ip == target.host_ip
                            && p.port == target.port
                            && p.protocol == target.protocol
                    })
                    .map(|p| p.action.tool_id.to_lowercase()),
            ),
            Err(err) => warn!(target = %target, error = %err, "Approval queue unavailable"),
        }

        attempted
    }

    async fn host_state_for(&self, target: &Target) -> HostState {
        match self.deps.host_state.get(&target.host_ip).await {
            Ok(Some(state)) => state,
            Ok(None) => HostState::empty(&target.host_ip),
            Err(err) => {
                warn!(target = %target, error = %err, "Host state unavailable; using empty state");
                HostState::empty(&target.host_ip)
            }
        }
    }

    fn build_context(
        &self,
        target: &Target,
        mode: ScanMode,
        attempted: &BTreeSet<String>,
        state: &HostState,
        recent_output: &str,
        budget: RoundBudget,
    ) -> DecisionContext {
        let coverage_mode = match mode {
            ScanMode::Standard => CoverageMode::Standard,
            ScanMode::DeepAnalysis => CoverageMode::DeepAnalysis,
        };
        let coverage = analyze_coverage(&CoverageRequest {
            profile: target.profile(),
            attempted,
            known_cve_count: state
                .findings
                .iter()
                .filter(|f| f.cve.is_some())
                .count(),
            technologies: &state.technologies,
            mode: coverage_mode,
        });

        DecisionContext {
            service_banner: (!target.service_name.is_empty())
                .then(|| target.service_name.clone()),
            recent_output: (!recent_output.is_empty())
                .then(|| tail_chars(recent_output, budget.recent_output_char_budget)),
            technologies: state.technologies.clone(),
            known_cves: state
                .findings
                .iter()
                .filter_map(|f| f.cve.clone())
                .collect(),
            coverage: Some(coverage),
            raw: None,
        }
    }

    /// Family pre-approval short-circuits the approval requirement.
    async fn needs_approval(&self, action: &PlannedAction) -> bool {
        if !action.requires_approval {
            return false;
        }
        if let Some(family) = &action.family_id {
            match self.deps.approvals.family_preapproved(family).await {
                Ok(true) => return false,
                Ok(false) => {}
                Err(err) => {
                    warn!(family, error = %err, "Pre-approval lookup failed; requiring approval")
                }
            }
        }
        true
    }

    async fn queue_approval(&self, target: &Target, action: PlannedAction) {
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            host_ip: target.host_ip.clone(),
            port: target.port,
            protocol: target.protocol.clone(),
            action: action.clone(),
            queued_at: Utc::now(),
            decided: None,
        };
        let approval_id = approval.id;

        if let Err(err) = self.deps.approvals.queue(approval).await {
            warn!(target = %target, tool_id = %action.tool_id, error = %err, "Failed to queue approval");
            return;
        }
        self.audit(target, &action, Some(approval_id)).await;
        info!(target = %target, tool_id = %action.tool_id, "Action queued for approval");
    }

    async fn audit(&self, target: &Target, action: &PlannedAction, approval_id: Option<Uuid>) {
        let entry = DecisionLogEntry {
            host_ip: target.host_ip.clone(),
            port: target.port,
            protocol: target.protocol.clone(),
            tool_id: action.tool_id.clone(),
            timestamp: Utc::now(),
            rationale: action.rationale.clone(),
            approval_id,
        };
        if let Err(err) = self.deps.audit.append(entry).await {
            warn!(target = %target, tool_id = %action.tool_id, error = %err, "Audit append failed");
        }
    }

    /// Execute a round's batch, bounded by configured concurrency; a pool
    /// or batch of one runs strictly inline. Each task is error-isolated:
    /// a failed action never aborts its siblings.
    async fn execute_batch(
        &self,
        target: &Target,
        actions: Vec<PlannedAction>,
        job_id: Option<u64>,
        cancel: &CancellationToken,
    ) -> Vec<(PlannedAction, Option<String>)> {
        let concurrency = self.config.concurrency.clamp(1, 16);

        if concurrency == 1 || actions.len() == 1 {
            let mut results = Vec::with_capacity(actions.len());
            for action in actions {
                let output = self.execute_action(target, &action, job_id, cancel).await;
                results.push((action, output));
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = tokio::task::JoinSet::new();

        for (index, action) in actions.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let this = self.clone();
            let target = target.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let output = this.execute_action(&target, &action, job_id, &cancel).await;
                (index, action, output)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => indexed.push(result),
                Err(err) => warn!(target = %target, error = %err, "Batch task aborted"),
            }
        }
        indexed.sort_by_key(|(index, _, _)| *index);
        indexed
            .into_iter()
            .map(|(_, action, output)| (action, output))
            .collect()
    }

    /// Run one action through the tracked executor; records the decision
    /// and the script result. Returns the captured output on success.
    async fn execute_action(
        &self,
        target: &Target,
        action: &PlannedAction,
        job_id: Option<u64>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        self.audit(target, action, None).await;

        let spec = render_command(target, action);
        let binding = job_id.map(|job_id| JobBinding {
            job_id,
            cancel: cancel.clone(),
        });

        let run = match self.executor.run_tracked(spec, binding).await {
            Ok(run) => run,
            Err(err) => {
                warn!(target = %target, tool_id = %action.tool_id, error = %err, "Action failed to start");
                return None;
            }
        };

        let succeeded = run.outcome.succeeded();
        let result = ScriptResult {
            tool_id: action.tool_id.clone(),
            host_ip: target.host_ip.clone(),
            port: target.port,
            protocol: target.protocol.clone(),
            output: run.output.clone(),
            succeeded,
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.deps.scripts.record(result).await {
            warn!(target = %target, tool_id = %action.tool_id, error = %err, "Script result not recorded");
        }

        if succeeded {
            Some(run.output)
        } else {
            debug!(
                target = %target,
                tool_id = %action.tool_id,
                reason = %run.outcome.reason(),
                "Action did not complete"
            );
            None
        }
    }

    /// Mine successful output and merge it into the persisted host state.
    /// Returns whether anything new was learned.
    async fn absorb_output(&self, target: &Target, tool_id: &str, output: &str) -> bool {
        let mut state = self.host_state_for(target).await;

        let mut mined = extract_technologies(output);
        if mined.is_empty() && state.technologies.is_empty() {
            mined.extend(fallback_technology(&target.service_name));
        }
        let findings = extract_findings(&[], &[output]);

        let fingerprint_before = evidence_fingerprint(&state);

        state.technologies =
            merge_technologies(state.technologies.into_iter().chain(mined));
        state.findings = merge_findings(state.findings.into_iter().chain(findings));

        let guesses = extract_host_guesses(output);
        if let Some((value, confidence)) = guesses.hostname {
            state.consider_hostname(Guess { value, confidence });
        }
        if let Some((value, confidence)) = guesses.os {
            state.consider_os(Guess { value, confidence });
        }

        let changed = evidence_fingerprint(&state) != fingerprint_before;
        if changed {
            state.updated_at = Utc::now();
            if let Err(err) = self.deps.host_state.upsert(state).await {
                warn!(target = %target, tool_id, error = %err, "Host state upsert failed");
                return false;
            }
            debug!(target = %target, tool_id, "Host state updated with new evidence");
        }
        changed
    }

    /// Read-only evidence projection for one host, for presentation layers.
    pub async fn evidence_projection(&self, host_ip: &str) -> EvidenceReport {
        match self.deps.host_state.get(host_ip).await {
            Ok(Some(state)) => EvidenceReport {
                technologies: state.technologies,
                findings: state.findings,
            },
            Ok(None) => EvidenceReport::default(),
            Err(err) => {
                warn!(host_ip, error = %err, "Host state unavailable for projection");
                EvidenceReport::default()
            }
        }
    }

    /// Read-only coverage projection for one target, computed fresh.
    pub async fn coverage_projection(&self, target: &Target, mode: ScanMode) -> CoverageResult {
        let attempted = self.attempted_tools(target).await;
        let state = self.host_state_for(target).await;
        analyze_coverage(&CoverageRequest {
            profile: target.profile(),
            attempted: &attempted,
            known_cve_count: state.findings.iter().filter(|f| f.cve.is_some()).count(),
            technologies: &state.technologies,
            mode: match mode {
                ScanMode::Standard => CoverageMode::Standard,
                ScanMode::DeepAnalysis => CoverageMode::DeepAnalysis,
            },
        })
    }
}

/// Cheap structural summary used to detect whether a merge changed state.
fn evidence_fingerprint(state: &HostState) -> (usize, i32, usize, String, String) {
    (
        state.technologies.len(),
        state.technologies.iter().map(|t| t.quality).sum(),
        state.findings.len(),
        state.hostname.value.clone(),
        state.operating_system.value.clone(),
    )
}

/// Render the command template into an executable spec. Placeholders
/// `{host}`, `{port}` and `{protocol}` are substituted before the template
/// is split into argv tokens.
fn render_command(target: &Target, action: &PlannedAction) -> CommandSpec {
    let rendered = action
        .command_template
        .replace("{host}", &target.host_ip)
        .replace("{port}", &target.port.to_string())
        .replace("{protocol}", &target.protocol);

    let mut tokens = rendered.split_whitespace();
    let program = tokens.next().unwrap_or("true").to_string();

    let mut spec = CommandSpec::new(&action.tool_id, program);
    spec.args = tokens.map(str::to_string).collect();
    spec.progress_capable = action.command_template.contains("--stats-every")
        || action.tool_id.starts_with("nmap");
    spec
}

/// Keep the tail of the rolling output within the char budget.
fn append_recent(recent: &mut String, output: &str, budget: usize) {
    if !recent.is_empty() {
        recent.push('\n');
    }
    recent.push_str(output);
    if recent.chars().count() > budget {
        *recent = tail_chars(recent, budget);
    }
}

fn tail_chars(text: &str, budget: usize) -> String {
    let count = text.chars().count();
    if count <= budget {
        return text.to_string();
    }
    text.chars().skip(count - budget).collect()
}
