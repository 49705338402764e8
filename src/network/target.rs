//! Target records accumulated by the attack pipeline
//!
//! A [`Target`] is owned by exactly one worker while a job runs. None of the
//! mutators here lock anything; exclusivity comes from ownership.

use super::Protocol;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Whether a target is a single host or a whole network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Endpoint,
    Network { prefix: u8 },
}

/// One open port with whatever service information is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub protocol: Protocol,
    pub service: Option<String>,
    pub version: Option<String>,
}

impl Port {
    pub fn new(number: u16, protocol: Protocol) -> Self {
        Self {
            number,
            protocol,
            service: None,
            version: None,
        }
    }

    pub fn with_service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Key the port set is unique by
    pub fn key(&self) -> (u16, Protocol) {
        (self.number, self.protocol)
    }

    fn merge(&mut self, newer: Port) {
        if newer.service.is_some() {
            self.service = newer.service;
        }
        if newer.version.is_some() {
            self.version = newer.version;
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)?;
        if let Some(service) = &self.service {
            write!(f, " {}", service)?;
        }
        if let Some(version) = &self.version {
            write!(f, " ({})", version)?;
        }
        Ok(())
    }
}

/// A known vulnerability, usually a CVE entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub identifier: String,
    pub summary: String,
    /// CVSS-like score in 0.0..=10.0
    pub severity: f32,
}

impl Vulnerability {
    pub fn new<S: Into<String>>(identifier: S, summary: S, severity: f32) -> Self {
        Self {
            identifier: identifier.into(),
            summary: summary.into(),
            severity,
        }
    }
}

/// Metasploit-style exploit rank, ordered from least to most reliable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExploitRank {
    Manual,
    Low,
    Average,
    Normal,
    Good,
    Great,
    Excellent,
}

/// Where an exploit comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExploitKind {
    /// Public exploit code, not launchable automatically
    Local,
    /// A module the RPC-backed exploitation framework can launch
    Msf { module: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exploit {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub rank: ExploitRank,
    pub kind: ExploitKind,
}

impl Exploit {
    pub fn local<S: Into<String>>(id: S, name: S, rank: ExploitRank) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: None,
            rank,
            kind: ExploitKind::Local,
        }
    }

    pub fn msf<S: Into<String>>(id: S, module: S, rank: ExploitRank) -> Self {
        let module = module.into();
        Self {
            id: id.into(),
            name: module.clone(),
            url: None,
            rank,
            kind: ExploitKind::Msf { module },
        }
    }

    pub fn is_msf(&self) -> bool {
        matches!(self.kind, ExploitKind::Msf { .. })
    }
}

/// One discovered host (or network) under reconnaissance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    address: IpAddr,
    kind: TargetKind,
    hardware_address: Option<String>,
    ports: Vec<Port>,
    device_os: Option<String>,
    device_type: Option<String>,
    vulnerabilities: Vec<Vulnerability>,
    exploits: Vec<Exploit>,
    /// UI selection state, untouched by the pipeline
    pub selected: bool,
}

impl Target {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            kind: TargetKind::Endpoint,
            hardware_address: None,
            ports: Vec::new(),
            device_os: None,
            device_type: None,
            vulnerabilities: Vec::new(),
            exploits: Vec::new(),
            selected: false,
        }
    }

    pub fn network(address: IpAddr, prefix: u8) -> Self {
        Self {
            kind: TargetKind::Network { prefix },
            ..Self::new(address)
        }
    }

    pub fn with_hardware_address<S: Into<String>>(mut self, mac: S) -> Self {
        self.hardware_address = Some(mac.into());
        self
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn hardware_address(&self) -> Option<&str> {
        self.hardware_address.as_deref()
    }

    /// Representation passed to command line tools
    pub fn command_line_representation(&self) -> String {
        match self.kind {
            TargetKind::Endpoint => self.address.to_string(),
            TargetKind::Network { prefix } => format!("{}/{}", self.address, prefix),
        }
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, number: u16, protocol: Protocol) -> Option<&Port> {
        self.ports.iter().find(|p| p.key() == (number, protocol))
    }

    /// Record an open port. An entry with the same (port, protocol) key is
    /// merged: newer service/version information replaces older, missing
    /// information never erases what is already known.
    pub fn add_open_port(&mut self, port: Port) {
        match self.ports.iter_mut().find(|p| p.key() == port.key()) {
            Some(existing) => existing.merge(port),
            None => self.ports.push(port),
        }
    }

    pub fn has_open_ports(&self) -> bool {
        !self.ports.is_empty()
    }

    pub fn has_open_ports_with_service(&self) -> bool {
        self.ports.iter().any(|p| p.service.is_some())
    }

    pub fn has_versioned_services(&self) -> bool {
        self.ports
            .iter()
            .any(|p| p.service.is_some() && p.version.is_some())
    }

    pub fn device_os(&self) -> Option<&str> {
        self.device_os.as_deref()
    }

    pub fn set_device_os<S: Into<String>>(&mut self, os: S) {
        self.device_os = Some(os.into());
    }

    pub fn device_type(&self) -> Option<&str> {
        self.device_type.as_deref()
    }

    pub fn set_device_type<S: Into<String>>(&mut self, device: S) {
        self.device_type = Some(device.into());
    }

    pub fn vulnerabilities(&self) -> &[Vulnerability] {
        &self.vulnerabilities
    }

    pub fn has_vulnerabilities(&self) -> bool {
        !self.vulnerabilities.is_empty()
    }

    /// Unique by identifier; a repeated identifier refreshes the entry
    pub fn add_vulnerability(&mut self, vuln: Vulnerability) {
        match self
            .vulnerabilities
            .iter_mut()
            .find(|v| v.identifier == vuln.identifier)
        {
            Some(existing) => *existing = vuln,
            None => self.vulnerabilities.push(vuln),
        }
    }

    pub fn exploits(&self) -> &[Exploit] {
        &self.exploits
    }

    pub fn has_exploits(&self) -> bool {
        !self.exploits.is_empty()
    }

    pub fn has_msf_exploits(&self) -> bool {
        self.exploits.iter().any(Exploit::is_msf)
    }

    pub fn add_exploit(&mut self, exploit: Exploit) {
        match self.exploits.iter_mut().find(|e| e.id == exploit.id) {
            Some(existing) => *existing = exploit,
            None => self.exploits.push(exploit),
        }
    }

    /// Highest ranked exploit the RPC framework can launch. Ties keep the
    /// earliest discovered one.
    pub fn best_msf_exploit(&self) -> Option<&Exploit> {
        self.exploits
            .iter()
            .filter(|e| e.is_msf())
            .fold(None, |best: Option<&Exploit>, e| match best {
                Some(b) if b.rank >= e.rank => Some(b),
                _ => Some(e),
            })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line_representation())
    }
}
