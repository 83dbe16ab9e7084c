//! Core domain models
//!
//! Pure business logic with no I/O: target classification, evidence mining,
//! coverage analysis and progress inference. Everything here is unit-testable
//! without a runtime.

pub mod coverage;
pub mod evidence;
pub mod progress;
pub mod target;

pub use coverage::{CoverageMode, CoverageRequest, CoverageResult, CoverageStage, analyze_coverage};
pub use evidence::{EvidenceReport, FindingObservation, Severity, TechnologyObservation};
pub use progress::{ProgressHint, ProgressState, parse_progress};
pub use target::{ServiceProfile, Target};
