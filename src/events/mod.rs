//! Events produced by supervised processes
//!
//! Every line a child writes is classified into exactly one [`Event`]:
//! either a generic [`Event::LogMessage`] or a tool specific
//! [`Event::ToolFinding`].

pub mod parser;

use crate::network::Protocol;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

pub use parser::{ArpSpoofParser, HydraParser, NmapParser, OutputParser, RawParser};

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Message severity, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "VERBOSE",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// Matching level for the `log` facade
    pub fn log_level(&self) -> log::Level {
        match self {
            Severity::Verbose => log::Level::Trace,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Fatal => log::Level::Error,
        }
    }
}

impl FromStr for Severity {
    type Err = crate::DeimosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VERBOSE" => Ok(Severity::Verbose),
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "FATAL" => Ok(Severity::Fatal),
            other => Err(crate::DeimosError::ParseError(format!(
                "unknown severity '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured findings recognised by the tool parsers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Finding {
    /// Traceroute hop
    Hop {
        hop: u16,
        address: String,
        rtt: Option<Duration>,
    },
    Port {
        port: u16,
        protocol: Protocol,
    },
    Service {
        port: u16,
        protocol: Protocol,
        service: String,
        version: Option<String>,
    },
    Os {
        os: String,
    },
    Device {
        device_type: String,
    },
    /// Login cracker progress
    Attempts {
        rate: u32,
        sent: u64,
        left: u64,
        elapsed_minutes: u32,
        eta_minutes: u32,
    },
    Login {
        port: u16,
        service: String,
        address: Option<IpAddr>,
        login: Option<String>,
        password: Option<String>,
    },
}

impl Finding {
    /// Short tag naming the finding kind
    pub fn kind(&self) -> &'static str {
        match self {
            Finding::Hop { .. } => "hop",
            Finding::Port { .. } => "open-port",
            Finding::Service { .. } => "service",
            Finding::Os { .. } => "os",
            Finding::Device { .. } => "device",
            Finding::Attempts { .. } => "attempts",
            Finding::Login { .. } => "login",
        }
    }
}

/// One unit of classified output from a supervised process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    LogMessage { severity: Severity, text: String },
    ToolFinding(Finding),
}

impl Event {
    pub fn message<S: Into<String>>(severity: Severity, text: S) -> Self {
        Event::LogMessage {
            severity,
            text: text.into(),
        }
    }

    /// Fallback classification for a line no parser recognised
    pub fn plain(line: &str, stream: StreamKind) -> Self {
        let severity = match stream {
            StreamKind::Stdout => Severity::Info,
            StreamKind::Stderr => Severity::Warning,
        };
        Event::message(severity, line)
    }

    pub fn finding(&self) -> Option<&Finding> {
        match self {
            Event::ToolFinding(finding) => Some(finding),
            Event::LogMessage { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::LogMessage { severity, text } => {
                write!(f, "Message: {{ severity='{}', text='{}' }}", severity, text)
            }
            Event::ToolFinding(finding) => write!(f, "Finding: {{ kind='{}', {:?} }}", finding.kind(), finding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_str() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("fatal".parse::<Severity>().unwrap(), Severity::Fatal);
        assert!("LOUD".parse::<Severity>().is_err());
    }

    #[test]
    fn test_plain_lines_by_stream() {
        assert_eq!(
            Event::plain("hello", StreamKind::Stdout),
            Event::message(Severity::Info, "hello")
        );
        assert_eq!(
            Event::plain("oops", StreamKind::Stderr),
            Event::message(Severity::Warning, "oops")
        );
    }
}
