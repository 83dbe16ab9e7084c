//! Scanforge Core - Foundation crate for the Scanforge scan engine
//!
//! This crate provides the pure, I/O-free half of the engine:
//!
//! # Modules
//!
//! - [`config`] — Strongly-typed configuration with TOML and environment variable support
//! - [`domain`] — Targets, evidence mining, coverage analysis, progress inference
//! - [`logging`] — Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! scanforge-core/
//! ├── domain/           # Pure business logic
//! │   ├── target        # (host, port, protocol, service) tuples
//! │   ├── evidence/     # Technology and vulnerability signal mining
//! │   ├── coverage      # Missing-check analysis per service class
//! │   └── progress      # Percent/remaining markers in tool output
//! ├── logging/          # tracing initialisation
//! └── config/           # Configuration management
//! ```
//!
//! # Configuration
//!
//! Load configuration from files and environment:
//!
//! ```rust,ignore
//! use scanforge_core::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `SCANFORGE__` prefix with double underscore
//! separators:
//!
//! ```bash
//! SCANFORGE__SCHEDULER__MAX_ROUNDS=6
//! SCANFORGE__QUEUE__WORKER_COUNT=4
//! ```

pub mod config;
pub mod domain;
pub mod logging;

pub use config::Config;
pub use logging::init_tracing;
