//! Job facade
//!
//! The surface consumed by presentation layers: submit/list/get/cancel on
//! the queue, plus the per-target run-now and dig-deeper triggers, each of
//! which submits a whole scheduling pass as one job. Cancelling through
//! this facade also kills every tracked process registered under the job.

use std::sync::Arc;

use tracing::info;

use scanforge_core::domain::Target;

use crate::application::scheduler::{AdaptiveScheduler, PassRequest};
use crate::domain::entities::Job;
use crate::domain::value_objects::ScanMode;
use crate::infrastructure::job_queue::{JobQueue, JobQueueError, JobRunner};
use crate::infrastructure::process::ActiveProcessRegistry;

/// High-level entry point tying the queue, the process registry and the
/// scheduler together.
pub struct JobService {
    queue: Arc<JobQueue>,
    registry: Arc<ActiveProcessRegistry>,
    scheduler: Arc<AdaptiveScheduler>,
}

impl JobService {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<ActiveProcessRegistry>,
        scheduler: Arc<AdaptiveScheduler>,
    ) -> Self {
        Self {
            queue,
            registry,
            scheduler,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Submit an arbitrary job.
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        runner: JobRunner,
        payload: serde_json::Value,
        queue_front: bool,
        exclusive: bool,
    ) -> Job {
        self.queue
            .submit(job_type, runner, payload, queue_front, exclusive)
            .await
    }

    pub async fn list(&self, limit: usize) -> Vec<Job> {
        self.queue.list(limit).await
    }

    pub async fn get(&self, id: u64) -> Option<Job> {
        self.queue.get(id).await
    }

    /// Cancel a job and kill every tracked process registered under it.
    pub async fn cancel(&self, id: u64, reason: impl Into<String>) -> Result<Job, JobQueueError> {
        let job = self.queue.cancel(id, reason).await?;
        let killed = self.registry.kill_all_for_job(id);
        if killed > 0 {
            info!(job_id = id, processes = killed, "Flagged tracked processes for kill");
        }
        Ok(job)
    }

    /// Run a standard pass against one target, ahead of queued work.
    pub async fn run_now(&self, target: Target) -> Job {
        self.submit_pass(
            "target-scan",
            PassRequest {
                mode: ScanMode::Standard,
                only_target: Some(target),
            },
            true,
        )
        .await
    }

    /// Run a deep-analysis pass against one target.
    pub async fn dig_deeper(&self, target: Target) -> Job {
        self.submit_pass(
            "target-deep-analysis",
            PassRequest {
                mode: ScanMode::DeepAnalysis,
                only_target: Some(target),
            },
            true,
        )
        .await
    }

    /// Run a full scheduling pass over every catalogued target.
    pub async fn run_full_pass(&self, mode: ScanMode) -> Job {
        self.submit_pass(
            "scheduler-pass",
            PassRequest {
                mode,
                only_target: None,
            },
            false,
        )
        .await
    }

    async fn submit_pass(&self, job_type: &str, request: PassRequest, queue_front: bool) -> Job {
        let payload = serde_json::to_value(&request).unwrap_or(serde_json::Value::Null);
        let scheduler = self.scheduler.clone();

        let runner: JobRunner = Box::new(move |ctx| {
            Box::pin(async move {
                let report = scheduler
                    .run_pass(request, Some(ctx.id), ctx.cancel.clone())
                    .await;
                if report.cancelled {
                    anyhow::bail!("pass cancelled before completion");
                }
                Ok(serde_json::to_value(report)?)
            })
        });

        self.queue
            .submit(job_type, runner, payload, queue_front, false)
            .await
    }
}
