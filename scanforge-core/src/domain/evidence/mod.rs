//! Evidence mining
//!
//! Free text coming back from scan tools (service banners, script output,
//! process output) is mined for two signal families: technologies running
//! on a target and vulnerability findings. Extraction is pure and
//! pattern-driven; the I/O-heavy scheduling loop feeds it text and stores
//! what comes out.

pub mod entities;
pub mod extractor;

pub use entities::{
    EvidenceReport, FindingObservation, Severity, StructuredVulnerability, TechnologyObservation,
};
pub use extractor::{
    HostGuesses, extract_findings, extract_host_guesses, extract_technologies,
    fallback_technology, merge_findings, merge_technologies, sanitize_fragment,
};
