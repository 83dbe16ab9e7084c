//! Generic concurrent job queue
//!
//! A bounded pool of long-lived worker tasks drains a FIFO queue of jobs.
//! Jobs may be queued to the front, and may be exclusive: an exclusive job
//! starts only once nothing else is running, and nothing else starts while
//! it runs or waits at the head. The queue owns every [`Job`] record and
//! mutates it only under one internal lock; callers get clones.
//!
//! Cancellation is cooperative. Cancelling a queued job removes it before
//! it starts; cancelling a running job sets a flag (and fires the job's
//! token) that the runner polls at its own suspension points.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scanforge_core::config::QueueConfig;

use crate::domain::entities::Job;
use crate::domain::value_objects::JobStatus;

/// What a runner produces: a JSON result, or an error recorded on the job.
pub type JobOutput = Result<serde_json::Value, anyhow::Error>;

/// Context handed to a job runner when it starts.
pub struct JobContext {
    pub id: u64,
    pub payload: serde_json::Value,
    /// Fired when cancellation is requested; poll at suspension points
    pub cancel: CancellationToken,
}

/// A job body: consumes its context, yields the job output.
pub type JobRunner = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, JobOutput> + Send>;

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error("No job with id {0}")]
    NotFound(u64),
}

struct JobEntry {
    job: Job,
    /// Taken by the worker that starts the job
    runner: Option<JobRunner>,
    cancel: CancellationToken,
}

struct QueueState {
    next_id: u64,
    /// Every retained job in submission order, terminal and active alike
    entries: VecDeque<JobEntry>,
    /// Ids still waiting to start, in dispatch order
    pending: VecDeque<u64>,
    running: usize,
    exclusive_active: bool,
    workers: usize,
    max_jobs: usize,
}

impl QueueState {
    fn entry_mut(&mut self, id: u64) -> Option<&mut JobEntry> {
        self.entries.iter_mut().find(|e| e.job.id == id)
    }

    /// Evict terminal jobs oldest-first while over capacity. Active jobs
    /// are never evicted, so the list may stay over the cap.
    fn trim(&mut self) {
        while self.entries.len() > self.max_jobs {
            let Some(pos) = self.entries.iter().position(|e| e.job.status.is_terminal()) else {
                break;
            };
            if let Some(evicted) = self.entries.remove(pos) {
                debug!(job_id = evicted.job.id, "Evicted terminal job over capacity");
            }
        }
    }
}

/// The queue. Construct with [`JobQueue::new`]; clone the `Arc` freely.
pub struct JobQueue {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl JobQueue {
    /// Create a queue and spawn its initial worker pool.
    pub fn new(config: &QueueConfig) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(QueueState {
                next_id: 1,
                entries: VecDeque::new(),
                pending: VecDeque::new(),
                running: 0,
                exclusive_active: false,
                workers: 0,
                max_jobs: config.max_jobs.max(1),
            }),
            wake: Notify::new(),
        });
        let initial = config.worker_count.max(1);
        let queue_ref = queue.clone();
        tokio::spawn(async move {
            queue_ref.ensure_worker_count(initial).await;
        });
        queue
    }

    /// Submit a job. Returns a snapshot of the queued record.
    pub async fn submit(
        self: &Arc<Self>,
        job_type: impl Into<String>,
        runner: JobRunner,
        payload: serde_json::Value,
        queue_front: bool,
        exclusive: bool,
    ) -> Job {
        let snapshot = {
            let mut st = self.state.lock().await;
            let id = st.next_id;
            st.next_id += 1;

            let job = Job::new(id, job_type, payload, exclusive);
            let entry = JobEntry {
                job: job.clone(),
                runner: Some(runner),
                cancel: CancellationToken::new(),
            };
            st.entries.push_back(entry);
            if queue_front {
                st.pending.push_front(id);
            } else {
                st.pending.push_back(id);
            }
            st.trim();
            job
        };

        info!(
            job_id = snapshot.id,
            job_type = %snapshot.job_type,
            exclusive = snapshot.exclusive,
            "Job queued"
        );
        self.wake.notify_waiters();
        snapshot
    }

    /// Most recent jobs first, up to `limit`.
    pub async fn list(&self, limit: usize) -> Vec<Job> {
        let st = self.state.lock().await;
        st.entries
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.job.clone())
            .collect()
    }

    pub async fn get(&self, id: u64) -> Option<Job> {
        let st = self.state.lock().await;
        st.entries.iter().find(|e| e.job.id == id).map(|e| e.job.clone())
    }

    /// Cancel a job.
    ///
    /// A queued job is removed and terminally cancelled at once. A running
    /// job only gets its cancel-requested flag set; the runner observes it
    /// cooperatively. Tracked processes registered under the job id are the
    /// caller's concern (see `JobService::cancel`).
    pub async fn cancel(&self, id: u64, reason: impl Into<String>) -> Result<Job, JobQueueError> {
        let reason = reason.into();
        let snapshot = {
            let mut st = self.state.lock().await;
            let entry = st.entry_mut(id).ok_or(JobQueueError::NotFound(id))?;

            match entry.job.status {
                JobStatus::Queued => {
                    entry.job.cancel_requested = true;
                    entry.job.cancel_reason = Some(reason.clone());
                    mark(&mut entry.job, JobStatus::Cancelled, Some(reason.clone()));
                    entry.cancel.cancel();
                    let job = entry.job.clone();
                    st.pending.retain(|&p| p != id);
                    st.trim();
                    job
                }
                JobStatus::Running => {
                    entry.job.cancel_requested = true;
                    entry.job.cancel_reason = Some(reason.clone());
                    entry.cancel.cancel();
                    entry.job.clone()
                }
                // Terminal jobs are immutable; report current state
                _ => entry.job.clone(),
            }
        };

        info!(job_id = id, reason = %reason, status = %snapshot.status, "Job cancel requested");
        self.wake.notify_waiters();
        Ok(snapshot)
    }

    /// Grow the worker pool to at least `n`. Workers are never shut down,
    /// so the effective count only increases toward the latest request.
    pub async fn ensure_worker_count(self: &Arc<Self>, n: usize) {
        let mut st = self.state.lock().await;
        if n <= st.workers {
            debug!(current = st.workers, requested = n, "Worker pool already large enough");
            return;
        }
        for worker_id in st.workers..n {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.worker_loop(worker_id).await;
            });
        }
        info!(from = st.workers, to = n, "Worker pool grown");
        st.workers = n;
    }

    /// Adjust the retention cap and trim immediately.
    pub async fn ensure_max_jobs(&self, n: usize) {
        let mut st = self.state.lock().await;
        st.max_jobs = n.max(1);
        st.trim();
    }

    /// Number of currently running jobs (for tests and introspection).
    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Queue worker started");
        loop {
            // Register interest before checking state so a notify between
            // the check and the await cannot be lost.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claimed = {
                let mut st = self.state.lock().await;
                try_claim(&mut st)
            };

            match claimed {
                Some((id, runner, ctx)) => {
                    let output = match std::panic::AssertUnwindSafe(runner(ctx))
                        .catch_unwind()
                        .await
                    {
                        Ok(output) => output,
                        Err(_) => Err(anyhow::anyhow!("job runner panicked")),
                    };
                    self.finish(id, output).await;
                }
                None => notified.await,
            }
        }
    }

    async fn finish(&self, id: u64, output: JobOutput) {
        {
            let mut st = self.state.lock().await;
            st.running = st.running.saturating_sub(1);

            let mut was_exclusive = false;
            if let Some(entry) = st.entry_mut(id) {
                match output {
                    Ok(result) => {
                        entry.job.result = Some(result);
                        mark(&mut entry.job, JobStatus::Completed, None);
                    }
                    Err(err) => {
                        // Cancellation requested concurrently wins over the
                        // runner's own error
                        if entry.job.cancel_requested {
                            let reason = entry.job.cancel_reason.clone();
                            mark(&mut entry.job, JobStatus::Cancelled, reason);
                        } else {
                            entry.job.error = Some(err.to_string());
                            mark(&mut entry.job, JobStatus::Failed, Some(err.to_string()));
                        }
                    }
                }
                was_exclusive = entry.job.exclusive;
                info!(job_id = id, status = %entry.job.status, "Job finished");
            } else {
                warn!(job_id = id, "Finished job no longer in registry");
            }

            if was_exclusive {
                st.exclusive_active = false;
            }
            st.trim();
        }
        self.wake.notify_waiters();
    }
}

/// Apply a transition that is valid by construction; a failure here is a
/// queue invariant violation worth a warning, not a panic.
fn mark(job: &mut Job, to: JobStatus, reason: Option<String>) {
    if let Err(err) = job.transition(to, reason) {
        warn!(job_id = job.id, error = %err, "Rejected job transition");
    }
}

/// The dequeue rule, evaluated under the queue lock:
/// 1. nothing starts while an exclusive job runs;
/// 2. an exclusive head starts only with zero running jobs, and blocks the
///    head until the queue drains;
/// 3. a non-exclusive head starts unconditionally in FIFO order.
fn try_claim(st: &mut QueueState) -> Option<(u64, JobRunner, JobContext)> {
    if st.exclusive_active {
        return None;
    }
    let head = *st.pending.front()?;
    let running = st.running;
    let entry = st.entry_mut(head)?;

    if entry.job.exclusive && running > 0 {
        return None;
    }

    let runner = entry.runner.take()?;
    mark(&mut entry.job, JobStatus::Running, None);
    let ctx = JobContext {
        id: head,
        payload: entry.job.payload.clone(),
        cancel: entry.cancel.clone(),
    };
    let exclusive = entry.job.exclusive;

    st.pending.pop_front();
    st.running += 1;
    if exclusive {
        st.exclusive_active = true;
    }
    Some((head, runner, ctx))
}
