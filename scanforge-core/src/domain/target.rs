//! Scan targets and service classification

use serde::{Deserialize, Serialize};

/// One (host, port, protocol, service) tuple under scheduling consideration.
///
/// Immutable for the duration of a scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub host_ip: String,
    pub port: u16,
    pub protocol: String,
    pub service_name: String,
}

impl Target {
    pub fn new(
        host_ip: impl Into<String>,
        port: u16,
        protocol: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            host_ip: host_ip.into(),
            port,
            protocol: protocol.into(),
            service_name: service_name.into(),
        }
    }

    /// Classify the service for coverage analysis.
    pub fn profile(&self) -> ServiceProfile {
        ServiceProfile::classify(&self.service_name, self.port)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{} ({})",
            self.host_ip, self.port, self.protocol, self.service_name
        )
    }
}

/// Service-class flags derived from the service name and port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub web: bool,
    pub rdp: bool,
    pub vnc: bool,
    pub smb: bool,
}

impl ServiceProfile {
    /// Derive the profile from a service name plus the port as a fallback
    /// signal when the name is generic or empty.
    pub fn classify(service_name: &str, port: u16) -> Self {
        let name = service_name.to_lowercase();

        let web = name.contains("http")
            || name.contains("www")
            || matches!(port, 80 | 443 | 8080 | 8000 | 8443 | 8888);
        let rdp = name.contains("ms-wbt") || name.contains("rdp") || port == 3389;
        let vnc = name.contains("vnc") || (5900..=5910).contains(&port);
        let smb = name.contains("microsoft-ds")
            || name.contains("netbios-ssn")
            || name.contains("smb")
            || matches!(port, 139 | 445);

        Self { web, rdp, vnc, smb }
    }

    /// True for the remote-desktop family (RDP or VNC).
    pub fn remote_desktop(&self) -> bool {
        self.rdp || self.vnc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_classification() {
        assert!(ServiceProfile::classify("http", 80).web);
        assert!(ServiceProfile::classify("https-alt", 8443).web);
        assert!(ServiceProfile::classify("unknown", 8080).web);
        assert!(!ServiceProfile::classify("ssh", 22).web);
    }

    #[test]
    fn test_remote_desktop_classification() {
        let rdp = ServiceProfile::classify("ms-wbt-server", 3389);
        assert!(rdp.rdp);
        assert!(rdp.remote_desktop());

        let vnc = ServiceProfile::classify("vnc", 5901);
        assert!(vnc.vnc);
        assert!(vnc.remote_desktop());
    }

    #[test]
    fn test_smb_classification() {
        assert!(ServiceProfile::classify("microsoft-ds", 445).smb);
        assert!(ServiceProfile::classify("netbios-ssn", 139).smb);
        assert!(!ServiceProfile::classify("ftp", 21).smb);
    }

    #[test]
    fn test_target_display() {
        let t = Target::new("10.0.0.5", 443, "tcp", "https");
        assert_eq!(t.to_string(), "10.0.0.5:443/tcp (https)");
    }
}
