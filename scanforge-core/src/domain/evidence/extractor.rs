//! Pattern-driven evidence extraction
//!
//! Pure functions over immutable text. Extraction priority for
//! technologies: structured CPE identifiers first, then curated keyword
//! matches with an adjacent version token, then the bare service/product
//! name only when nothing stronger matched.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::entities::{
    FindingObservation, Severity, StructuredVulnerability, TechnologyObservation, cpe_base,
};

/// Fragments longer than this are truncated before mining.
const MAX_FRAGMENT_LEN: usize = 8_000;

/// Observations scoring below this are discarded.
const MIN_QUALITY: i32 = 20;

static CPE_SHORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cpe:/[aho]:([a-z0-9_.~-]+):([a-z0-9_.~-]+)(?::([a-z0-9_.~-]+))?").unwrap());

static CPE_23: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cpe:2\.3:[aho]:([a-z0-9_.~-]+):([a-z0-9_.~-]+):([a-z0-9_.~*-]+)").unwrap());

static CVE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").unwrap());

static IPV4_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());

static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bv?(\d+(?:\.\d+)+[a-zA-Z0-9.-]*)").unwrap());

/// Curated vendor/product keyword table. The first column is matched as a
/// lowercase substring; the second is the canonical technology name.
const KEYWORD_TABLE: &[(&str, &str)] = &[
    ("openssh", "openssh"),
    ("apache httpd", "apache httpd"),
    ("apache/", "apache httpd"),
    ("nginx", "nginx"),
    ("lighttpd", "lighttpd"),
    ("microsoft-iis", "microsoft iis"),
    ("microsoft iis", "microsoft iis"),
    ("tomcat", "apache tomcat"),
    ("jetty", "jetty"),
    ("mysql", "mysql"),
    ("mariadb", "mariadb"),
    ("postgresql", "postgresql"),
    ("mongodb", "mongodb"),
    ("redis", "redis"),
    ("vsftpd", "vsftpd"),
    ("proftpd", "proftpd"),
    ("exim", "exim"),
    ("postfix", "postfix"),
    ("dovecot", "dovecot"),
    ("samba", "samba"),
    ("openssl", "openssl"),
    ("php/", "php"),
    ("wordpress", "wordpress"),
    ("jenkins", "jenkins"),
    ("grafana", "grafana"),
    ("node.js", "node.js"),
    ("express", "express"),
];

/// Names too generic to count as a real technology signal.
const GENERIC_NAMES: &[&str] = &[
    "",
    "unknown",
    "service",
    "generic",
    "tcp",
    "udp",
    "http",
    "https",
    "ssl",
    "tcpwrapped",
    "wrapped",
];

/// Whitespace-normalize a fragment, strip IPv4-shaped tokens, and cap its
/// length. All extraction input goes through this first.
pub fn sanitize_fragment(text: &str) -> String {
    let stripped = IPV4_TOKEN.replace_all(text, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = collapsed;
    if out.len() > MAX_FRAGMENT_LEN {
        // Truncate at a char boundary
        let mut cut = MAX_FRAGMENT_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

fn is_generic(name: &str) -> bool {
    GENERIC_NAMES.contains(&name.trim().to_lowercase().as_str())
}

/// A version token is plausible only when it carries at least one digit.
fn plausible_version(token: &str) -> bool {
    !token.is_empty() && token.chars().any(|c| c.is_ascii_digit())
}

/// Score an observation candidate against the evidence fragment it came
/// from. Candidates below [`MIN_QUALITY`] are dropped by the callers.
fn score(name: &str, version: Option<&str>, cpe: Option<&str>, evidence: &str) -> i32 {
    let mut quality = 0;

    let generic = is_generic(name);
    if !generic {
        quality += 18;
    }
    if version.is_some_and(plausible_version) {
        quality += 18;
    }
    if let Some(cpe) = cpe {
        quality += 32;
        // A structured identifier that itself encodes a version is worth more
        let encoded_version = match cpe.split(':').count() {
            n if cpe.starts_with("cpe:2.3:") => n >= 6,
            n => n >= 5,
        };
        if encoded_version {
            quality += 6;
        }
    }

    let lower = evidence.to_lowercase();
    if lower.contains("banner") {
        quality += 48;
    } else if lower.contains("service ") {
        quality += 22;
    }

    if generic && cpe.is_none() {
        quality -= 42;
    }
    if name.trim().len() < 3 && cpe.is_none() {
        quality -= 60;
    }

    quality
}

fn cpe_name(vendor: &str, product: &str) -> String {
    let _ = vendor;
    product.replace('_', " ")
}

/// Mine one sanitized fragment for technology observations.
///
/// Returns raw (un-deduplicated) observations; feed the union of all
/// fragments through [`merge_technologies`].
pub fn extract_technologies(fragment: &str) -> Vec<TechnologyObservation> {
    let text = sanitize_fragment(fragment);
    let mut found = Vec::new();

    // (a) structured identifiers, both grammars
    for caps in CPE_SHORT.captures_iter(&text) {
        let vendor = &caps[1];
        let product = &caps[2];
        let version = caps.get(3).map(|m| m.as_str().to_string());
        let cpe = caps[0].to_string();
        let name = cpe_name(vendor, product);
        let quality = score(&name, version.as_deref(), Some(&cpe), &text);
        if quality >= MIN_QUALITY {
            found.push(TechnologyObservation {
                name,
                version,
                cpe: Some(cpe),
                evidence: text.clone(),
                quality,
            });
        }
    }
    for caps in CPE_23.captures_iter(&text) {
        let vendor = &caps[1];
        let product = &caps[2];
        let version = match &caps[3] {
            "*" | "-" => None,
            v => Some(v.to_string()),
        };
        let cpe = caps[0].to_string();
        let name = cpe_name(vendor, product);
        let quality = score(&name, version.as_deref(), Some(&cpe), &text);
        if quality >= MIN_QUALITY {
            found.push(TechnologyObservation {
                name,
                version,
                cpe: Some(cpe),
                evidence: text.clone(),
                quality,
            });
        }
    }

    // (b) curated keyword table with adjacent version proposal
    let lower = text.to_lowercase();
    for (keyword, canonical) in KEYWORD_TABLE {
        if let Some(idx) = lower.find(keyword) {
            let tail_start = idx + keyword.len();
            let tail_end = (tail_start + 32).min(text.len());
            let tail = text
                .get(tail_start..tail_end)
                .unwrap_or_default();
            let version = VERSION_TOKEN
                .captures(tail)
                .map(|c| c[1].to_string())
                .filter(|v| plausible_version(v));
            let quality = score(canonical, version.as_deref(), None, &text);
            if quality >= MIN_QUALITY {
                found.push(TechnologyObservation {
                    name: canonical.to_string(),
                    version,
                    cpe: None,
                    evidence: text.clone(),
                    quality,
                });
            }
        }
    }

    found
}

/// (c) fall back to the bare product/service field only when no stronger
/// signal exists; the caller checks that condition via the merged set.
pub fn fallback_technology(service_name: &str) -> Option<TechnologyObservation> {
    let name = service_name.trim().to_lowercase();
    let evidence = format!("service {}", name);
    let quality = score(&name, None, None, &evidence);
    if quality < MIN_QUALITY {
        return None;
    }
    Some(TechnologyObservation {
        name,
        version: None,
        cpe: None,
        evidence,
        quality,
    })
}

/// Deduplicate observations by canonical key.
///
/// Collisions keep the highest score; ties break toward the longer version
/// string, then toward the candidate carrying a structured identifier.
pub fn merge_technologies(
    observations: impl IntoIterator<Item = TechnologyObservation>,
) -> Vec<TechnologyObservation> {
    let mut by_key: HashMap<String, TechnologyObservation> = HashMap::new();

    for obs in observations {
        let key = obs.canonical_key();
        if key.is_empty() {
            continue;
        }
        match by_key.get(&key) {
            Some(existing) if !wins_over(&obs, existing) => {}
            _ => {
                by_key.insert(key, obs);
            }
        }
    }

    let mut merged: Vec<_> = by_key.into_values().collect();
    merged.sort_by(|a, b| b.quality.cmp(&a.quality).then(a.name.cmp(&b.name)));
    merged
}

fn wins_over(candidate: &TechnologyObservation, incumbent: &TechnologyObservation) -> bool {
    let ver_len = |o: &TechnologyObservation| o.version.as_deref().map_or(0, str::len);
    candidate
        .quality
        .cmp(&incumbent.quality)
        .then(ver_len(candidate).cmp(&ver_len(incumbent)))
        .then(candidate.cpe.is_some().cmp(&incumbent.cpe.is_some()))
        .is_gt()
}

/// Mine vulnerability findings from structured records plus free text.
pub fn extract_findings(
    records: &[StructuredVulnerability],
    fragments: &[&str],
) -> Vec<FindingObservation> {
    let mut found = Vec::new();

    for record in records {
        let severity = record
            .severity
            .as_deref()
            .map(Severity::from_text)
            .unwrap_or(Severity::Info);
        let cve = record
            .cve
            .clone()
            .or_else(|| first_cve(&record.title))
            .or_else(|| record.description.as_deref().and_then(first_cve));
        found.push(FindingObservation {
            title: record.title.clone(),
            severity,
            cvss: record.cvss.unwrap_or(0.0).clamp(0.0, 10.0),
            cve,
            evidence: sanitize_fragment(record.description.as_deref().unwrap_or(&record.title)),
        });
    }

    for fragment in fragments {
        let text = sanitize_fragment(fragment);
        for caps in CVE_ID.captures_iter(&text) {
            let cve = caps[0].to_uppercase();
            found.push(FindingObservation {
                title: cve.clone(),
                severity: Severity::from_text(&text),
                cvss: 0.0,
                cve: Some(cve),
                evidence: text.clone(),
            });
        }
    }

    merge_findings(found)
}

fn first_cve(text: &str) -> Option<String> {
    CVE_ID.find(text).map(|m| m.as_str().to_uppercase())
}

static OS_DETAILS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)OS details:\s*([^;\n]{2,64})").unwrap());

static SERVICE_INFO_OS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)OS:\s*([A-Za-z][A-Za-z0-9 ./_-]{1,40})").unwrap());

static RDNS_RECORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rDNS record for [0-9.]+:\s*([a-z0-9][a-z0-9.-]{2,200})").unwrap());

static SCAN_REPORT_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)scan report for ([a-z0-9][a-z0-9.-]{2,200}) \(").unwrap());

/// Hostname and OS candidates mined from tool output, each with a 0-100
/// confidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostGuesses {
    pub hostname: Option<(String, u8)>,
    pub os: Option<(String, u8)>,
}

/// Mine hostname/OS guesses from one output fragment. Fingerprint-style
/// lines ("OS details:") rate higher confidence than incidental mentions.
pub fn extract_host_guesses(fragment: &str) -> HostGuesses {
    let mut guesses = HostGuesses::default();

    if let Some(caps) = RDNS_RECORD.captures(fragment) {
        guesses.hostname = Some((caps[1].trim_end_matches('.').to_string(), 85));
    } else if let Some(caps) = SCAN_REPORT_HOST.captures(fragment) {
        guesses.hostname = Some((caps[1].to_string(), 80));
    }

    if let Some(caps) = OS_DETAILS.captures(fragment) {
        guesses.os = Some((caps[1].trim().to_string(), 85));
    } else if let Some(caps) = SERVICE_INFO_OS.captures(fragment) {
        guesses.os = Some((caps[1].trim().to_string(), 72));
    }

    guesses
}

/// Deduplicate findings by (title, cve, severity) and order the merged set
/// by severity rank descending, then score descending.
pub fn merge_findings(
    findings: impl IntoIterator<Item = FindingObservation>,
) -> Vec<FindingObservation> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();

    for finding in findings {
        if seen.insert(finding.dedup_key()) {
            merged.push(finding);
        }
    }

    merged.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(b.cvss.total_cmp(&a.cvss))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_ipv4_and_collapses_whitespace() {
        let out = sanitize_fragment("host 192.168.1.10   running\t nginx");
        assert_eq!(out, "host running nginx");
    }

    #[test]
    fn test_short_form_cpe_extraction() {
        let obs = extract_technologies("Service detected: cpe:/a:openbsd:openssh:8.2p1");
        let ssh = obs.iter().find(|o| o.cpe.is_some()).unwrap();
        assert_eq!(ssh.name, "openssh");
        assert_eq!(ssh.version.as_deref(), Some("8.2p1"));
        assert!(ssh.quality >= 32 + 18);
    }

    #[test]
    fn test_version_qualified_cpe_extraction() {
        let obs = extract_technologies("cpe:2.3:a:nginx:nginx:1.18.0 on port");
        let nginx = obs.iter().find(|o| o.cpe.is_some()).unwrap();
        assert_eq!(nginx.name, "nginx");
        assert_eq!(nginx.version.as_deref(), Some("1.18.0"));
    }

    #[test]
    fn test_keyword_with_adjacent_version() {
        let obs = extract_technologies("SSH banner: OpenSSH 8.2p1 Ubuntu");
        let ssh = obs.iter().find(|o| o.name == "openssh").unwrap();
        assert_eq!(ssh.version.as_deref(), Some("8.2p1"));
        // banner phrase plus name plus version
        assert!(ssh.quality >= 18 + 18 + 48);
    }

    #[test]
    fn test_generic_name_without_identifier_discarded() {
        assert!(fallback_technology("tcpwrapped").is_none());
        assert!(fallback_technology("unknown").is_none());
        assert!(fallback_technology("x").is_none());
    }

    #[test]
    fn test_fallback_accepts_distinctive_service_name() {
        let obs = fallback_technology("vsftpd").unwrap();
        assert_eq!(obs.name, "vsftpd");
        assert!(obs.version.is_none());
        // Name plus service-field provenance, nothing more
        assert_eq!(obs.quality, 18 + 22);
    }

    #[test]
    fn test_merge_keeps_highest_quality_per_key() {
        let strong = TechnologyObservation {
            name: "openssh".into(),
            version: Some("8.2p1".into()),
            cpe: None,
            evidence: "SSH banner: OpenSSH 8.2p1".into(),
            quality: 85,
        };
        let weak = TechnologyObservation {
            name: "openssh".into(),
            version: None,
            cpe: None,
            evidence: "openssh".into(),
            quality: 22,
        };

        let merged = merge_technologies(vec![weak, strong.clone()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], strong);
    }

    #[test]
    fn test_merge_tie_breaks_on_version_length_then_cpe() {
        let short_ver = TechnologyObservation {
            name: "nginx".into(),
            version: Some("1.18".into()),
            cpe: None,
            evidence: "e1".into(),
            quality: 40,
        };
        let long_ver = TechnologyObservation {
            name: "nginx".into(),
            version: Some("1.18.0".into()),
            cpe: None,
            evidence: "e2".into(),
            quality: 40,
        };
        let merged = merge_technologies(vec![short_ver, long_ver.clone()]);
        assert_eq!(merged[0], long_ver);
    }

    #[test]
    fn test_cve_extraction_from_free_text() {
        let findings = extract_findings(
            &[],
            &["Host is vulnerable to CVE-2021-44228 (critical) and cve-2017-0144"],
        );
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().any(|f| f.cve.as_deref() == Some("CVE-2021-44228")));
        assert!(findings.iter().any(|f| f.cve.as_deref() == Some("CVE-2017-0144")));
        // Both mined from the same text, so both inherit the critical marker
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_structured_records_merge_with_text() {
        let record = StructuredVulnerability {
            title: "Remote code execution in log4j".into(),
            severity: Some("Critical".into()),
            cvss: Some(10.0),
            cve: Some("CVE-2021-44228".into()),
            description: None,
        };
        let findings = extract_findings(&[record], &["also seen: CVE-2019-0708 high risk"]);
        assert_eq!(findings.len(), 2);
        // Severity rank then cvss ordering: the critical record first
        assert_eq!(findings[0].cve.as_deref(), Some("CVE-2021-44228"));
        assert_eq!(findings[1].severity, Severity::High);
    }

    #[test]
    fn test_host_guesses_from_scan_output() {
        let output = "Nmap scan report for web01.corp.example (10.0.0.5)\n\
                      rDNS record for 10.0.0.5: web01.corp.example\n\
                      OS details: Linux 5.4 - 5.10";
        let guesses = extract_host_guesses(output);
        assert_eq!(
            guesses.hostname,
            Some(("web01.corp.example".to_string(), 85))
        );
        assert_eq!(guesses.os, Some(("Linux 5.4 - 5.10".to_string(), 85)));
    }

    #[test]
    fn test_service_info_os_is_lower_confidence() {
        let guesses = extract_host_guesses("Service Info: OS: Windows; CPE: cpe:/o:microsoft:windows");
        let (os, confidence) = guesses.os.unwrap();
        assert_eq!(os, "Windows");
        assert_eq!(confidence, 72);
        assert!(guesses.hostname.is_none());
    }

    #[test]
    fn test_finding_dedup() {
        let a = FindingObservation {
            title: "CVE-2021-44228".into(),
            severity: Severity::Critical,
            cvss: 10.0,
            cve: Some("CVE-2021-44228".into()),
            evidence: "first sighting".into(),
        };
        let b = FindingObservation {
            evidence: "second sighting".into(),
            ..a.clone()
        };
        assert_eq!(merge_findings(vec![a, b]).len(), 1);
    }
}
