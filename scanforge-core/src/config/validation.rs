//! Configuration validation module

use crate::config::{Config, ExecutionConfig, QueueConfig, SchedulerConfig};

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Queue configuration error: {message}")]
    Queue { message: String },

    #[error("Execution configuration error: {message}")]
    Execution { message: String },

    #[error("Scheduler configuration error: {message}")]
    Scheduler { message: String },
}

impl ValidationError {
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }
}

impl Validate for QueueConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_count == 0 {
            return Err(ValidationError::queue(
                "worker_count must be greater than 0",
            ));
        }

        if self.max_jobs == 0 {
            return Err(ValidationError::queue("max_jobs must be greater than 0"));
        }

        Ok(())
    }
}

impl Validate for ExecutionConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.default_timeout_seconds == 0 {
            return Err(ValidationError::execution(
                "default_timeout_seconds must be greater than 0",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ValidationError::execution(
                "poll_interval_ms must be greater than 0",
            ));
        }

        // Snapshot cadence below 100ms would turn the throttle into a firehose
        if self.snapshot_interval_ms < 100 {
            return Err(ValidationError::execution(format!(
                "snapshot_interval_ms must be at least 100, got {}",
                self.snapshot_interval_ms
            )));
        }

        if self.max_output_bytes == 0 {
            return Err(ValidationError::execution(
                "max_output_bytes must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=12).contains(&self.max_rounds) {
            return Err(ValidationError::scheduler(format!(
                "max_rounds must be in range 1-12, got {}",
                self.max_rounds
            )));
        }

        if !(1..=8).contains(&self.max_actions_per_round) {
            return Err(ValidationError::scheduler(format!(
                "max_actions_per_round must be in range 1-8, got {}",
                self.max_actions_per_round
            )));
        }

        if !(320..=4000).contains(&self.recent_output_char_budget) {
            return Err(ValidationError::scheduler(format!(
                "recent_output_char_budget must be in range 320-4000, got {}",
                self.recent_output_char_budget
            )));
        }

        if !(1..=16).contains(&self.concurrency) {
            return Err(ValidationError::scheduler(format!(
                "concurrency must be in range 1-16, got {}",
                self.concurrency
            )));
        }

        Ok(())
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.queue.validate()?;
        self.execution.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}
