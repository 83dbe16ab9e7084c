//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub execution: ExecutionConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of long-lived worker tasks servicing the queue
    pub worker_count: usize,
    /// Retention cap; terminal jobs beyond this are evicted oldest-first
    pub max_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_jobs: 200,
        }
    }
}

/// Tracked process execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock timeout applied when a command carries none of its own
    pub default_timeout_seconds: u64,
    /// Supervision poll cadence
    pub poll_interval_ms: u64,
    /// Minimum interval between durable output snapshots
    pub snapshot_interval_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on kill/cancel
    pub kill_grace_ms: u64,
    /// How long to keep draining output after process exit before the
    /// stream is force-closed (descendants may hold it open)
    pub stream_grace_seconds: u64,
    /// Cap on the in-memory output buffer per process
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 600,
            poll_interval_ms: 100,
            snapshot_interval_ms: 500,
            kill_grace_ms: 1500,
            stream_grace_seconds: 2,
            max_output_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ExecutionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn stream_grace(&self) -> Duration {
        Duration::from_secs(self.stream_grace_seconds)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

/// Adaptive scheduling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Rounds per target per pass (1-12)
    pub max_rounds: u32,
    /// Candidate actions requested per round (1-8)
    pub max_actions_per_round: u32,
    /// Characters of recent tool output passed to the planner (320-4000)
    pub recent_output_char_budget: usize,
    /// Concurrent action executions within one round (1-16)
    pub concurrency: usize,
    /// Pass-level ceiling on executed actions; 0 disables the cap
    pub pass_max_actions: u32,
    /// Pass-level wall-clock ceiling in seconds; 0 disables the cap
    pub pass_max_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_actions_per_round: 4,
            recent_output_char_budget: 1600,
            concurrency: 4,
            pass_max_actions: 48,
            pass_max_seconds: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from layered sources.
    ///
    /// Later sources override earlier ones: `config/default`, then
    /// `config/{ENV}` when the `ENV` variable is set, then `config/local`,
    /// then `SCANFORGE__*` environment variables.
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("SCANFORGE").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}
