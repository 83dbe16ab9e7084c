//! Evidence entities

use serde::{Deserialize, Serialize};

/// Finding severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Rank for descending-severity ordering (higher is more severe).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Info => 0,
        }
    }

    /// Derive a severity from free text by substring match; anything
    /// unrecognised is informational.
    pub fn from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("critical") {
            Self::Critical
        } else if lower.contains("high") {
            Self::High
        } else if lower.contains("medium") {
            Self::Medium
        } else if lower.contains("low") {
            Self::Low
        } else {
            Self::Info
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A technology observed on a target, with the evidence that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnologyObservation {
    /// Normalized technology name (lowercase)
    pub name: String,
    /// Version token, when one was found next to the signal
    pub version: Option<String>,
    /// Structured identifier, when the text carried one
    pub cpe: Option<String>,
    /// The fragment that produced this observation
    pub evidence: String,
    /// Heuristic quality score; observations below 20 are discarded
    pub quality: i32,
}

impl TechnologyObservation {
    /// Canonical dedup key: the normalized name, or the CPE
    /// vendor:product base when the name is absent.
    pub fn canonical_key(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.cpe
            .as_deref()
            .map(cpe_base)
            .unwrap_or_default()
    }
}

/// Extract the `vendor:product` base from a CPE in either grammar.
pub fn cpe_base(cpe: &str) -> String {
    let parts: Vec<&str> = cpe.split(':').collect();
    // cpe:/a:vendor:product[:version] or cpe:2.3:a:vendor:product:version:...
    if parts.len() >= 4 && parts[1] == "2.3" {
        format!("{}:{}", parts[3], parts.get(4).copied().unwrap_or(""))
    } else if parts.len() >= 4 {
        format!("{}:{}", parts[2], parts[3])
    } else {
        cpe.to_string()
    }
}

/// A vulnerability signal mined from evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingObservation {
    pub title: String,
    pub severity: Severity,
    /// CVSS base score, 0.0-10.0
    pub cvss: f64,
    pub cve: Option<String>,
    pub evidence: String,
}

impl FindingObservation {
    /// Dedup key: (title, cve, severity).
    pub fn dedup_key(&self) -> (String, Option<String>, Severity) {
        (
            self.title.to_lowercase(),
            self.cve.as_ref().map(|c| c.to_uppercase()),
            self.severity,
        )
    }
}

/// A vulnerability record that arrived in structured form (e.g. a parsed
/// scanner result) rather than being mined from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredVulnerability {
    pub title: String,
    pub severity: Option<String>,
    pub cvss: Option<f64>,
    pub cve: Option<String>,
    pub description: Option<String>,
}

/// Everything mined out of one batch of evidence text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceReport {
    pub technologies: Vec<TechnologyObservation>,
    pub findings: Vec<FindingObservation>,
}

impl EvidenceReport {
    pub fn is_empty(&self) -> bool {
        self.technologies.is_empty() && self.findings.is_empty()
    }
}
