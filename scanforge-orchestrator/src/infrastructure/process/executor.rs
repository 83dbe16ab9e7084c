//! Supervised external-process execution
//!
//! Each tracked run spawns the command in its own process group, streams
//! combined stdout/stderr line-by-line through reader tasks, and supervises
//! the child on a ~100ms poll: draining output into an append-only buffer,
//! flushing throttled snapshots to the durable record store, inferring
//! progress, and checking timeout, kill requests and cooperative
//! cancellation. Timeout force-kills immediately and wins final attribution
//! over a cancellation arriving in the same cycle; kill and cancel send a
//! graceful SIGTERM to the group before escalating to SIGKILL.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scanforge_core::config::ExecutionConfig;
use scanforge_core::domain::progress::{ProgressState, parse_progress};

use crate::domain::entities::{ProcessRecord, ProcessRecordStatus};
use crate::domain::services::ProcessRecordStore;
use crate::domain::value_objects::ExecutionOutcome;

use super::registry::ActiveProcessRegistry;

/// Notice appended when a held-open stream is force-closed after exit.
const STREAM_CLOSED_NOTICE: &str = "[output stream closed after grace period]";

/// Notice appended once when the output buffer cap is reached.
const TRUNCATED_NOTICE: &str = "[output truncated]";

/// One command to execute under supervision.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub tool_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Wall-clock limit; the configured default applies when absent
    pub timeout: Option<Duration>,
    /// Whether the tool emits recognisable progress markers
    pub progress_capable: bool,
}

impl CommandSpec {
    pub fn new(tool_id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
            progress_capable: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn progress_capable(mut self, capable: bool) -> Self {
        self.progress_capable = capable;
        self
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Ties a tracked process to the job it runs under.
#[derive(Clone)]
pub struct JobBinding {
    pub job_id: u64,
    pub cancel: CancellationToken,
}

/// Result of one tracked run.
#[derive(Debug, Clone)]
pub struct TrackedRun {
    pub outcome: ExecutionOutcome,
    pub record_id: Uuid,
    /// The full captured output (possibly truncated at the configured cap)
    pub output: String,
}

/// Errors from the executor itself; outcomes of the child are not errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs one external command under supervision. Cheap to clone via `Arc`.
pub struct TrackedProcessExecutor {
    records: Arc<dyn ProcessRecordStore>,
    registry: Arc<ActiveProcessRegistry>,
    config: ExecutionConfig,
}

impl TrackedProcessExecutor {
    pub fn new(
        records: Arc<dyn ProcessRecordStore>,
        registry: Arc<ActiveProcessRegistry>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            records,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ActiveProcessRegistry> {
        &self.registry
    }

    /// Run a command to completion under supervision.
    pub async fn run_tracked(
        &self,
        spec: CommandSpec,
        binding: Option<JobBinding>,
    ) -> Result<TrackedRun, ExecutorError> {
        let record_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timeout = spec.timeout.unwrap_or_else(|| self.config.default_timeout());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        info!(
            %record_id,
            tool_id = %spec.tool_id,
            pid = ?pid,
            timeout_secs = timeout.as_secs(),
            "Tracked process started"
        );

        let initial = ProcessRecord {
            id: record_id,
            job_id: binding.as_ref().map(|b| b.job_id),
            tool_id: spec.tool_id.clone(),
            command: spec.display(),
            status: ProcessRecordStatus::Running,
            output: String::new(),
            progress_percent: None,
            remaining_seconds: None,
            elapsed_seconds: 0,
            exit_code: None,
            started_at,
            finished_at: None,
            reason: None,
        };
        if let Err(err) = self.records.create(initial.clone()).await {
            warn!(%record_id, error = %err, "Failed to create process record");
        }

        if let Some(pid) = pid {
            self.registry
                .register(record_id, pid, binding.as_ref().map(|b| b.job_id));
        }

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, tx.clone());
        }
        // Stream end is signalled by both readers dropping their senders
        drop(tx);

        let (outcome, output) = self
            .supervise(&mut child, record_id, rx, timeout, &spec, binding.as_ref(), initial)
            .await;

        self.registry.deregister(record_id);

        info!(%record_id, tool_id = %spec.tool_id, reason = %outcome.reason(), "Tracked process finished");

        Ok(TrackedRun {
            outcome,
            record_id,
            output,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn supervise(
        &self,
        child: &mut Child,
        record_id: Uuid,
        mut rx: mpsc::UnboundedReceiver<String>,
        timeout: Duration,
        spec: &CommandSpec,
        binding: Option<&JobBinding>,
        mut record: ProcessRecord,
    ) -> (ExecutionOutcome, String) {
        let started = Instant::now();
        let poll = self.config.poll_interval();
        let snapshot_every = self.config.snapshot_interval();

        let mut buffer = String::new();
        let mut truncated = false;
        let mut progress = ProgressState::new();
        let mut dirty = false;
        let mut last_flush = Instant::now();
        let mut outcome: Option<ExecutionOutcome> = None;
        let mut exit_code: Option<i32> = None;
        let mut exited_at: Option<Instant> = None;
        let mut stream_open = true;

        loop {
            // Drain everything the readers have queued
            loop {
                match rx.try_recv() {
                    Ok(line) => {
                        append_line(
                            &mut buffer,
                            &line,
                            self.config.max_output_bytes,
                            &mut truncated,
                        );
                        dirty = true;
                        let hint = parse_progress(&line);
                        if progress.apply(hint, Instant::now()) {
                            record.progress_percent = Some(progress.percent);
                            record.remaining_seconds = progress.remaining_seconds;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        stream_open = false;
                        break;
                    }
                }
            }

            // Observe exit
            if exited_at.is_none() {
                if let Some(status) = child.try_wait().ok().flatten() {
                    exit_code = status.code();
                    exited_at = Some(Instant::now());
                    if outcome.is_none() {
                        outcome = Some(if status.success() {
                            ExecutionOutcome::Completed
                        } else {
                            ExecutionOutcome::Failed { exit_code }
                        });
                    }
                }
            }

            // Terminal checks while the process is still alive. Timeout is
            // checked first and never overwritten, so it wins over a
            // cancellation arriving in the same cycle.
            if exited_at.is_none() && outcome.is_none() {
                if started.elapsed() >= timeout {
                    warn!(%record_id, timeout_secs = timeout.as_secs(), "Tracked process timed out");
                    self.kill_group_now(child);
                    outcome = Some(ExecutionOutcome::TimedOut);
                } else if self.registry.kill_requested(record_id) {
                    self.kill_group_graceful(child).await;
                    outcome = Some(ExecutionOutcome::Killed {
                        reason: "kill requested".to_string(),
                    });
                } else if binding.is_some_and(|b| b.cancel.is_cancelled()) {
                    self.kill_group_graceful(child).await;
                    outcome = Some(ExecutionOutcome::Killed {
                        reason: "job cancelled".to_string(),
                    });
                }
            }

            // After exit, keep draining until the readers signal stream end;
            // a descendant holding the pipes open is cut off after a bounded
            // grace period.
            if let Some(exited) = exited_at {
                if !stream_open {
                    break;
                }
                if exited.elapsed() >= self.config.stream_grace() {
                    while let Ok(line) = rx.try_recv() {
                        append_line(
                            &mut buffer,
                            &line,
                            self.config.max_output_bytes,
                            &mut truncated,
                        );
                    }
                    append_line(
                        &mut buffer,
                        STREAM_CLOSED_NOTICE,
                        self.config.max_output_bytes,
                        &mut truncated,
                    );
                    dirty = true;
                    debug!(%record_id, "Output stream force-closed after grace period");
                    break;
                }
            }

            // Throttled snapshot: new data at the snapshot cadence, or the
            // ~1s elapsed-counter refresh
            let since_flush = last_flush.elapsed();
            if (dirty && since_flush >= snapshot_every) || since_flush >= Duration::from_secs(1) {
                record.output = buffer.clone();
                record.elapsed_seconds = started.elapsed().as_secs();
                if let Err(err) = self.records.save_snapshot(record.clone()).await {
                    // Transient: the next flush carries the full state again
                    warn!(%record_id, error = %err, "Process snapshot flush failed");
                }
                dirty = false;
                last_flush = Instant::now();
            }

            tokio::time::sleep(poll).await;
        }

        let outcome = outcome.unwrap_or(ExecutionOutcome::Failed { exit_code });

        if outcome.succeeded() && spec.progress_capable {
            record.progress_percent = Some(100.0);
            record.remaining_seconds = Some(0);
        }

        record.status = ProcessRecordStatus::from(&outcome);
        record.output = buffer.clone();
        record.elapsed_seconds = started.elapsed().as_secs();
        record.exit_code = exit_code;
        record.finished_at = Some(Utc::now());
        record.reason = Some(outcome.reason());
        if let Err(err) = self.records.save_snapshot(record).await {
            warn!(%record_id, error = %err, "Final process snapshot failed");
        }

        (outcome, buffer)
    }

    /// Immediate SIGKILL to the whole process group (timeout path).
    fn kill_group_now(&self, child: &mut Child) {
        signal_group(child, GroupSignal::Kill);
    }

    /// SIGTERM the group, wait briefly, then SIGKILL if still alive.
    async fn kill_group_graceful(&self, child: &mut Child) {
        signal_group(child, GroupSignal::Terminate);
        if tokio::time::timeout(self.config.kill_grace(), child.wait())
            .await
            .is_err()
        {
            signal_group(child, GroupSignal::Kill);
        }
    }
}

enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: GroupSignal) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // The child leads its own group, so its pid is the pgid. The process
    // may already be gone; that is not an error worth surfacing.
    if let Err(err) = killpg(Pid::from_raw(pid as i32), sig) {
        debug!(pid, error = %err, "Process group signal not delivered");
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: GroupSignal) {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "Process kill not delivered");
    }
}

fn spawn_line_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    tx: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Append a line to the buffer, enforcing the cap once with a notice. The
/// buffer only ever grows until completion.
fn append_line(buffer: &mut String, line: &str, max_bytes: usize, truncated: &mut bool) {
    if *truncated {
        return;
    }
    if buffer.len() + line.len() + 1 > max_bytes {
        *truncated = true;
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(TRUNCATED_NOTICE);
        return;
    }
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(line);
}
