//! Scanforge Orchestrator - job queue, tracked process execution, adaptive scheduling
//!
//! This crate carries the stateful half of the engine:
//!
//! - [`infrastructure::job_queue`] — generic concurrent job queue with
//!   exclusivity, cooperative cancellation, and capacity-bounded retention
//! - [`infrastructure::process`] — supervised external-process execution
//!   with live output streaming, timeout/kill handling and progress inference
//! - [`application::scheduler`] — per-target plan → execute → observe →
//!   replan rounds driven by evidence and coverage analysis
//! - [`domain::services`] — contracts for the external collaborators
//!   (action planner, approval queue, audit sink, durable stores)
//!
//! ```text
//! scanforge-orchestrator/
//! ├── domain/           # Job, actions, records, collaborator contracts
//! ├── application/      # Adaptive scheduler and the job facade
//! └── infrastructure/   # Queue and tracked process executor
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::jobs::JobService;
pub use application::scheduler::AdaptiveScheduler;
pub use infrastructure::job_queue::JobQueue;
pub use infrastructure::process::{ActiveProcessRegistry, TrackedProcessExecutor};
