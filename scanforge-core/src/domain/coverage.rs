//! Coverage-gap analysis
//!
//! Given what a target's service looks like and which tools already ran
//! against it, compute the baseline and follow-up checks still missing.
//! Each rule is independent and contributes at most one gap tag plus one
//! recommendation; the result is recomputed fresh every scheduling round
//! and never persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::evidence::TechnologyObservation;
use super::target::ServiceProfile;

/// Tool identifiers for the baseline and follow-up check families.
pub mod tools {
    pub const DISCOVERY: &str = "nmap";
    pub const BANNER: &str = "banner";
    pub const SCREENSHOT: &str = "screenshooter";
    pub const NMAP_VULN: &str = "nmap-vuln.nse";
    pub const NUCLEI_WEB: &str = "nuclei-web";
    pub const FINGERPRINT: &str = "whatweb";
    pub const CONTENT_DISCOVERY: &str = "feroxbuster";
    pub const DETAILED_SCAN: &str = "nmap-detail";
    pub const TLS_PROBE: &str = "tls-probe";
    pub const WAF_PROBE: &str = "waf-probe";
    pub const EDGE_PROBE: &str = "edge-probe";
}

/// Analysis mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    #[default]
    Standard,
    DeepAnalysis,
}

/// Where the target sits in its scan lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStage {
    Baseline,
    PostBaseline,
    DigDeeper,
    DeepAnalysis,
}

/// Output of one coverage computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageResult {
    pub mode: CoverageMode,
    pub stage: CoverageStage,
    /// Ordered gap tags, one per triggered rule
    pub gaps: Vec<String>,
    /// Tool ids recommended to close the gaps, in rule order
    pub recommended_tools: Vec<String>,
    /// Lower-cased tool ids that were observed as already attempted
    pub observed_tools: Vec<String>,
    pub profile: ServiceProfile,
    pub known_cve_count: usize,
    pub technology_count: usize,
}

/// Inputs to one coverage computation.
#[derive(Debug, Clone)]
pub struct CoverageRequest<'a> {
    pub profile: ServiceProfile,
    /// Lower-cased ids of tools already attempted against the target
    pub attempted: &'a BTreeSet<String>,
    pub known_cve_count: usize,
    pub technologies: &'a [TechnologyObservation],
    pub mode: CoverageMode,
}

/// A technology match confident enough to justify vulnerability follow-up.
const CONFIDENT_TECHNOLOGY_QUALITY: i32 = 50;

/// Compute missing baseline/follow-up checks for one target.
pub fn analyze_coverage(request: &CoverageRequest<'_>) -> CoverageResult {
    let attempted = request.attempted;
    let profile = request.profile;

    let tried = |tool: &str| attempted.contains(tool);
    let vuln_scanned = tried(tools::NMAP_VULN) || tried(tools::NUCLEI_WEB);
    let confident_technology = request
        .technologies
        .iter()
        .any(|t| t.quality >= CONFIDENT_TECHNOLOGY_QUALITY);

    let mut gaps: Vec<String> = Vec::new();
    let mut recommended: Vec<String> = Vec::new();

    fn recommend(gaps: &mut Vec<String>, recommended: &mut Vec<String>, gap: &str, tool: &str) {
        gaps.push(gap.to_string());
        if !recommended.iter().any(|t| t == tool) {
            recommended.push(tool.to_string());
        }
    }

    // Nothing attempted at all: start with a generic probe
    if attempted.is_empty() {
        recommend(&mut gaps, &mut recommended, "no_discovery", tools::DISCOVERY);
    }

    // Web services get a visual capture early
    if profile.web && !tried(tools::SCREENSHOT) {
        recommend(&mut gaps, &mut recommended, "missing_screenshot", tools::SCREENSHOT);
    }

    // Web services want both vulnerability-scan families
    if profile.web {
        if !tried(tools::NMAP_VULN) {
            recommend(&mut gaps, &mut recommended, "missing_nmap_vuln", tools::NMAP_VULN);
        }
        if !tried(tools::NUCLEI_WEB) {
            recommend(&mut gaps, &mut recommended, "missing_nuclei_auto", tools::NUCLEI_WEB);
        }
    }

    // A confident technology match with no vulnerability follow-up yet
    if confident_technology && !vuln_scanned && request.known_cve_count == 0 {
        if !tried(tools::NMAP_VULN) {
            recommend(&mut gaps, &mut recommended, "missing_vuln_followup", tools::NMAP_VULN);
        }
        if !tried(tools::NUCLEI_WEB) {
            recommend(&mut gaps, &mut recommended, "missing_vuln_followup_web", tools::NUCLEI_WEB);
        }
    }

    // Nothing inferred about the stack and no fingerprinting tried
    if request.technologies.is_empty() && !tried(tools::FINGERPRINT) {
        recommend(&mut gaps, &mut recommended, "missing_fingerprinting", tools::FINGERPRINT);
    }

    // Once any vulnerability scan has run, fill in the depth tools
    if vuln_scanned {
        if !tried(tools::FINGERPRINT) {
            recommend(&mut gaps, &mut recommended, "missing_fingerprinting_depth", tools::FINGERPRINT);
        }
        if !tried(tools::CONTENT_DISCOVERY) {
            recommend(&mut gaps, &mut recommended, "missing_content_discovery", tools::CONTENT_DISCOVERY);
        }
        if !tried(tools::DETAILED_SCAN) {
            recommend(&mut gaps, &mut recommended, "missing_detailed_scan", tools::DETAILED_SCAN);
        }
    }

    // Remote-desktop services also warrant a capture
    if !profile.web && profile.remote_desktop() && !tried(tools::SCREENSHOT) {
        recommend(&mut gaps, &mut recommended, "missing_screenshot", tools::SCREENSHOT);
    }

    // Known CVEs demand the standard follow-ups
    if request.known_cve_count > 0 {
        if !tried(tools::NMAP_VULN) {
            recommend(&mut gaps, &mut recommended, "missing_cve_followup", tools::NMAP_VULN);
        }
        if !tried(tools::DETAILED_SCAN) {
            recommend(&mut gaps, &mut recommended, "missing_cve_detail", tools::DETAILED_SCAN);
        }
    }

    // Deep analysis with nothing else missing: probe the edges
    if request.mode == CoverageMode::DeepAnalysis && gaps.is_empty() {
        for tool in [tools::TLS_PROBE, tools::WAF_PROBE, tools::EDGE_PROBE] {
            if !tried(tool) {
                recommend(&mut gaps, &mut recommended, "deep_edge_probe", tool);
            }
        }
    }

    let stage = match (request.mode, gaps.is_empty()) {
        (CoverageMode::DeepAnalysis, true) => CoverageStage::DeepAnalysis,
        (CoverageMode::DeepAnalysis, false) => CoverageStage::DigDeeper,
        (CoverageMode::Standard, true) => CoverageStage::PostBaseline,
        (CoverageMode::Standard, false) => CoverageStage::Baseline,
    };

    CoverageResult {
        mode: request.mode,
        stage,
        gaps,
        recommended_tools: recommended,
        observed_tools: attempted.iter().cloned().collect(),
        profile,
        known_cve_count: request.known_cve_count,
        technology_count: request.technologies.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempted(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn web_profile() -> ServiceProfile {
        ServiceProfile {
            web: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_web_service_with_only_discovery_and_banner() {
        let tried = attempted(&["nmap", "banner"]);
        let result = analyze_coverage(&CoverageRequest {
            profile: web_profile(),
            attempted: &tried,
            known_cve_count: 0,
            technologies: &[],
            mode: CoverageMode::Standard,
        });

        for gap in ["missing_screenshot", "missing_nmap_vuln", "missing_nuclei_auto"] {
            assert!(result.gaps.iter().any(|g| g == gap), "missing gap {gap}");
        }
        for tool in ["screenshooter", "nmap-vuln.nse", "nuclei-web"] {
            assert!(
                result.recommended_tools.iter().any(|t| t == tool),
                "missing recommendation {tool}"
            );
        }
        assert_eq!(result.stage, CoverageStage::Baseline);
    }

    #[test]
    fn test_untouched_target_gets_generic_probe() {
        let tried = attempted(&[]);
        let result = analyze_coverage(&CoverageRequest {
            profile: ServiceProfile::default(),
            attempted: &tried,
            known_cve_count: 0,
            technologies: &[],
            mode: CoverageMode::Standard,
        });
        assert_eq!(result.gaps[0], "no_discovery");
        assert_eq!(result.recommended_tools[0], "nmap");
    }

    #[test]
    fn test_vuln_scan_unlocks_depth_tools() {
        let tried = attempted(&["nmap", "nuclei-web", "screenshooter"]);
        let tech = vec![TechnologyObservation {
            name: "nginx".into(),
            version: Some("1.18.0".into()),
            cpe: None,
            evidence: "banner".into(),
            quality: 84,
        }];
        let result = analyze_coverage(&CoverageRequest {
            profile: web_profile(),
            attempted: &tried,
            known_cve_count: 0,
            technologies: &tech,
            mode: CoverageMode::Standard,
        });

        for tool in ["whatweb", "feroxbuster", "nmap-detail"] {
            assert!(result.recommended_tools.iter().any(|t| t == tool));
        }
    }

    #[test]
    fn test_rdp_service_wants_capture() {
        let tried = attempted(&["nmap"]);
        let profile = ServiceProfile {
            rdp: true,
            ..Default::default()
        };
        let result = analyze_coverage(&CoverageRequest {
            profile,
            attempted: &tried,
            known_cve_count: 0,
            technologies: &[],
            mode: CoverageMode::Standard,
        });
        assert!(result.gaps.iter().any(|g| g == "missing_screenshot"));
        assert!(result.recommended_tools.iter().any(|t| t == "screenshooter"));
    }

    #[test]
    fn test_known_cves_demand_followup() {
        let tried = attempted(&["nmap", "banner"]);
        let result = analyze_coverage(&CoverageRequest {
            profile: ServiceProfile::default(),
            attempted: &tried,
            known_cve_count: 2,
            technologies: &[],
            mode: CoverageMode::Standard,
        });
        assert!(result.gaps.iter().any(|g| g == "missing_cve_followup"));
        assert!(result.recommended_tools.iter().any(|t| t == "nmap-vuln.nse"));
        assert!(result.recommended_tools.iter().any(|t| t == "nmap-detail"));
    }

    #[test]
    fn test_fully_covered_standard_target_is_post_baseline() {
        let tried = attempted(&[
            "nmap",
            "banner",
            "screenshooter",
            "nmap-vuln.nse",
            "nuclei-web",
            "whatweb",
            "feroxbuster",
            "nmap-detail",
        ]);
        let tech = vec![TechnologyObservation {
            name: "nginx".into(),
            version: None,
            cpe: None,
            evidence: "banner".into(),
            quality: 84,
        }];
        let result = analyze_coverage(&CoverageRequest {
            profile: web_profile(),
            attempted: &tried,
            known_cve_count: 0,
            technologies: &tech,
            mode: CoverageMode::Standard,
        });
        assert!(result.gaps.is_empty());
        assert_eq!(result.stage, CoverageStage::PostBaseline);
    }

    #[test]
    fn test_deep_analysis_edges_and_stage() {
        let tried = attempted(&[
            "nmap",
            "banner",
            "screenshooter",
            "nmap-vuln.nse",
            "nuclei-web",
            "whatweb",
            "feroxbuster",
            "nmap-detail",
        ]);
        let tech = vec![TechnologyObservation {
            name: "nginx".into(),
            version: None,
            cpe: None,
            evidence: "banner".into(),
            quality: 84,
        }];
        let result = analyze_coverage(&CoverageRequest {
            profile: web_profile(),
            attempted: &tried,
            known_cve_count: 0,
            technologies: &tech,
            mode: CoverageMode::DeepAnalysis,
        });
        // Edge probes fill an otherwise-empty gap list, keeping dig_deeper
        assert!(result.recommended_tools.iter().any(|t| t == "tls-probe"));
        assert_eq!(result.stage, CoverageStage::DigDeeper);

        let all_tried: BTreeSet<String> = tried
            .iter()
            .cloned()
            .chain(["tls-probe", "waf-probe", "edge-probe"].iter().map(|s| s.to_string()))
            .collect();
        let done = analyze_coverage(&CoverageRequest {
            profile: web_profile(),
            attempted: &all_tried,
            known_cve_count: 0,
            technologies: &tech,
            mode: CoverageMode::DeepAnalysis,
        });
        assert!(done.gaps.is_empty());
        assert_eq!(done.stage, CoverageStage::DeepAnalysis);
    }

    #[test]
    fn test_each_rule_contributes_once() {
        // Web + RDP cannot double-recommend the screenshot tool
        let tried = attempted(&["nmap"]);
        let profile = ServiceProfile {
            web: true,
            rdp: true,
            ..Default::default()
        };
        let result = analyze_coverage(&CoverageRequest {
            profile,
            attempted: &tried,
            known_cve_count: 0,
            technologies: &[],
            mode: CoverageMode::Standard,
        });
        let count = result
            .recommended_tools
            .iter()
            .filter(|t| *t == "screenshooter")
            .count();
        assert_eq!(count, 1);
    }
}
