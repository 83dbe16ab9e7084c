//! End-to-end evidence flow: raw tool output through extraction, merging
//! and coverage analysis.

use std::collections::BTreeSet;

use scanforge_core::domain::evidence::{
    extract_findings, extract_technologies, merge_technologies,
};
use scanforge_core::domain::{
    CoverageMode, CoverageRequest, CoverageStage, Severity, Target, analyze_coverage,
};

const NMAP_OUTPUT: &str = "\
Nmap scan report for web01.lab.example (10.20.30.40)
PORT     STATE SERVICE  VERSION
8080/tcp open  http     nginx 1.18.0
Service detected: cpe:/a:nginx:nginx:1.18.0
| http-vuln-check:
|   VULNERABLE: CVE-2021-23017 (high)
Service banner: nginx/1.18.0 (Ubuntu)
";

#[test]
fn test_output_drives_coverage_forward() {
    let target = Target::new("10.20.30.40", 8080, "tcp", "http");

    let technologies = merge_technologies(extract_technologies(NMAP_OUTPUT));
    let nginx = technologies
        .iter()
        .find(|t| t.name == "nginx")
        .expect("nginx observed");
    assert_eq!(nginx.version.as_deref(), Some("1.18.0"));
    assert!(nginx.cpe.is_some());

    let findings = extract_findings(&[], &[NMAP_OUTPUT]);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].cve.as_deref(), Some("CVE-2021-23017"));
    assert_eq!(findings[0].severity, Severity::High);

    // Before anything ran, the target sits at baseline with the full web
    // gap set
    let untouched = BTreeSet::new();
    let before = analyze_coverage(&CoverageRequest {
        profile: target.profile(),
        attempted: &untouched,
        known_cve_count: 0,
        technologies: &[],
        mode: CoverageMode::Standard,
    });
    assert_eq!(before.stage, CoverageStage::Baseline);
    assert!(before.recommended_tools.iter().any(|t| t == "nuclei-web"));

    // After the full baseline toolset ran and evidence landed, the stage
    // advances
    let attempted: BTreeSet<String> = [
        "nmap",
        "banner",
        "screenshooter",
        "nmap-vuln.nse",
        "nuclei-web",
        "whatweb",
        "feroxbuster",
        "nmap-detail",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let after = analyze_coverage(&CoverageRequest {
        profile: target.profile(),
        attempted: &attempted,
        known_cve_count: findings.iter().filter(|f| f.cve.is_some()).count(),
        technologies: &technologies,
        mode: CoverageMode::Standard,
    });
    assert!(after.gaps.is_empty());
    assert_eq!(after.stage, CoverageStage::PostBaseline);
    assert_eq!(after.known_cve_count, 1);
}
