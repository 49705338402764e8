//! Output Parser - classify tool output lines into events

use super::{Event, Finding, Severity, StreamKind};
use crate::network::Protocol;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Line classifier attached to a tool
pub trait OutputParser: Send + Sync {
    /// Parser name, used in logs
    fn name(&self) -> &'static str;

    /// Recognise a tool specific line. `None` means "not mine".
    fn parse(&self, line: &str, stream: StreamKind) -> Option<Event>;

    /// Classify a line, falling back to a plain log message
    fn classify(&self, line: &str, stream: StreamKind) -> Event {
        self.parse(line, stream)
            .unwrap_or_else(|| Event::plain(line, stream))
    }
}

/// Generic parser, every line is a log message
#[derive(Debug, Clone, Copy, Default)]
pub struct RawParser;

impl OutputParser for RawParser {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn parse(&self, _line: &str, _stream: StreamKind) -> Option<Event> {
        None
    }
}

static NMAP_DISCOVERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Discovered open port (\d+)/(\w+) on \S+").unwrap());
static NMAP_SERVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)/(tcp|udp)\s+open\s+(\S+)(?:\s+(.+?))?\s*$").unwrap());
static NMAP_PORT_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)/(tcp|udp)\s+open\s*$").unwrap());
static NMAP_OS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Running(?: \(JUST GUESSING\))?|OS details):\s+(.+?)\s*$").unwrap()
});
static NMAP_DEVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Device type:\s+(.+?)\s*$").unwrap());
static NMAP_HOP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s+([\d.]+) ms\s+(.+?)\s*$").unwrap());

/// Port scanner output
#[derive(Debug, Clone, Copy, Default)]
pub struct NmapParser;

impl NmapParser {
    fn hop(caps: &regex::Captures<'_>) -> Option<Finding> {
        let hop = caps[1].parse().ok()?;
        let rtt = caps[2]
            .parse::<f64>()
            .ok()
            .map(|ms| Duration::from_micros((ms * 1000.0).round() as u64));
        // "router.lan (10.0.0.1)" keeps the numeric address
        let rest = &caps[3];
        let address = match (rest.rfind('('), rest.rfind(')')) {
            (Some(open), Some(close)) if open < close => rest[open + 1..close].to_string(),
            _ => rest.to_string(),
        };
        Some(Finding::Hop { hop, address, rtt })
    }
}

impl OutputParser for NmapParser {
    fn name(&self) -> &'static str {
        "nmap"
    }

    fn parse(&self, line: &str, stream: StreamKind) -> Option<Event> {
        if stream == StreamKind::Stderr {
            return None;
        }
        let line = line.trim_end();

        let finding = if let Some(caps) = NMAP_DISCOVERED.captures(line) {
            Finding::Port {
                port: caps[1].parse().ok()?,
                protocol: caps[2].parse().ok()?,
            }
        } else if let Some(caps) = NMAP_PORT_ONLY.captures(line) {
            Finding::Port {
                port: caps[1].parse().ok()?,
                protocol: caps[2].parse().ok()?,
            }
        } else if let Some(caps) = NMAP_SERVICE.captures(line) {
            Finding::Service {
                port: caps[1].parse().ok()?,
                protocol: caps[2].parse::<Protocol>().ok()?,
                service: caps[3].to_string(),
                version: caps.get(4).map(|m| m.as_str().to_string()),
            }
        } else if let Some(caps) = NMAP_OS.captures(line) {
            Finding::Os {
                os: caps[1].to_string(),
            }
        } else if let Some(caps) = NMAP_DEVICE.captures(line) {
            Finding::Device {
                device_type: caps[1].to_string(),
            }
        } else if let Some(caps) = NMAP_HOP.captures(line) {
            Self::hop(&caps)?
        } else {
            return None;
        };

        Some(Event::ToolFinding(finding))
    }
}

static ARPSPOOF_ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\[ERROR\] (.*)$").unwrap());

/// ARP spoofer output: only error reports are meaningful
#[derive(Debug, Clone, Copy, Default)]
pub struct ArpSpoofParser;

impl OutputParser for ArpSpoofParser {
    fn name(&self) -> &'static str {
        "arpspoof"
    }

    fn parse(&self, line: &str, _stream: StreamKind) -> Option<Event> {
        ARPSPOOF_ERROR
            .captures(line)
            .map(|caps| Event::message(Severity::Error, &caps[1]))
    }
}

static HYDRA_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[STATUS\]\s+([\d.]+) tries/min, (\d+) tries in (\d+):(\d+)h, (\d+) to do in (\d+):(\d+)h")
        .unwrap()
});
static HYDRA_LOGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(\d+)\]\[([^\]]+)\]\s+host:\s+(\S+)(?:\s+login:\s+(\S+))?(?:\s+password:\s+(.+?))?\s*$")
        .unwrap()
});
static HYDRA_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(WARNING|ERROR)\]\s*(.*)$").unwrap());

/// Login cracker output
#[derive(Debug, Clone, Copy, Default)]
pub struct HydraParser;

impl HydraParser {
    fn minutes(hours: &str, minutes: &str) -> Option<u32> {
        Some(hours.parse::<u32>().ok()? * 60 + minutes.parse::<u32>().ok()?)
    }
}

impl OutputParser for HydraParser {
    fn name(&self) -> &'static str {
        "hydra"
    }

    fn parse(&self, line: &str, _stream: StreamKind) -> Option<Event> {
        let line = line.trim_end();

        if let Some(caps) = HYDRA_STATUS.captures(line) {
            let rate = caps[1].parse::<f64>().ok()? as u32;
            return Some(Event::ToolFinding(Finding::Attempts {
                rate,
                sent: caps[2].parse().ok()?,
                elapsed_minutes: Self::minutes(&caps[3], &caps[4])?,
                left: caps[5].parse().ok()?,
                eta_minutes: Self::minutes(&caps[6], &caps[7])?,
            }));
        }

        if let Some(caps) = HYDRA_LOGIN.captures(line) {
            return Some(Event::ToolFinding(Finding::Login {
                port: caps[1].parse().ok()?,
                service: caps[2].to_string(),
                address: caps[3].parse().ok(),
                login: caps.get(4).map(|m| m.as_str().to_string()),
                password: caps.get(5).map(|m| m.as_str().to_string()),
            }));
        }

        HYDRA_MESSAGE.captures(line).map(|caps| {
            let severity = caps[1].parse().unwrap_or(Severity::Warning);
            Event::message(severity, &caps[2])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(parser: &dyn OutputParser, line: &str) -> Option<Finding> {
        match parser.parse(line, StreamKind::Stdout) {
            Some(Event::ToolFinding(f)) => Some(f),
            _ => None,
        }
    }

    #[test]
    fn test_nmap_discovered_port() {
        assert_eq!(
            finding(&NmapParser, "Discovered open port 443/tcp on 192.168.1.1"),
            Some(Finding::Port { port: 443, protocol: Protocol::Tcp })
        );
    }

    #[test]
    fn test_nmap_service_lines() {
        assert_eq!(
            finding(&NmapParser, "22/tcp   open  ssh     OpenSSH 8.9p1 Ubuntu 3ubuntu0.1"),
            Some(Finding::Service {
                port: 22,
                protocol: Protocol::Tcp,
                service: "ssh".to_string(),
                version: Some("OpenSSH 8.9p1 Ubuntu 3ubuntu0.1".to_string()),
            })
        );
        assert_eq!(
            finding(&NmapParser, "53/udp open domain"),
            Some(Finding::Service {
                port: 53,
                protocol: Protocol::Udp,
                service: "domain".to_string(),
                version: None,
            })
        );
        assert_eq!(
            finding(&NmapParser, "8080/tcp open"),
            Some(Finding::Port { port: 8080, protocol: Protocol::Tcp })
        );
        assert_eq!(finding(&NmapParser, "161/udp open|filtered snmp"), None);
    }

    #[test]
    fn test_nmap_os_and_device() {
        assert_eq!(
            finding(&NmapParser, "Running: Linux 5.X"),
            Some(Finding::Os { os: "Linux 5.X".to_string() })
        );
        assert_eq!(
            finding(&NmapParser, "OS details: Linux 5.0 - 5.14"),
            Some(Finding::Os { os: "Linux 5.0 - 5.14".to_string() })
        );
        assert_eq!(
            finding(&NmapParser, "Device type: router"),
            Some(Finding::Device { device_type: "router".to_string() })
        );
    }

    #[test]
    fn test_nmap_hop() {
        match finding(&NmapParser, "2   12.30 ms gw.example.lan (10.0.0.1)") {
            Some(Finding::Hop { hop, address, rtt }) => {
                assert_eq!(hop, 2);
                assert_eq!(address, "10.0.0.1");
                assert_eq!(rtt, Some(Duration::from_micros(12_300)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nmap_ignores_stderr_and_noise() {
        assert!(NmapParser
            .parse("Discovered open port 80/tcp on 1.2.3.4", StreamKind::Stderr)
            .is_none());
        assert_eq!(
            NmapParser.classify("Starting Nmap 7.94", StreamKind::Stdout),
            Event::message(Severity::Info, "Starting Nmap 7.94")
        );
    }

    #[test]
    fn test_arpspoof_error() {
        assert_eq!(
            ArpSpoofParser.parse("[error] couldn't arp for host 10.0.0.9", StreamKind::Stderr),
            Some(Event::message(Severity::Error, "couldn't arp for host 10.0.0.9"))
        );
        assert!(ArpSpoofParser
            .parse("0:1:2:3:4:5 ff:ff:ff:ff:ff:ff 0806 42: arp reply", StreamKind::Stdout)
            .is_none());
    }

    #[test]
    fn test_hydra_status() {
        assert_eq!(
            finding(
                &HydraParser,
                "[STATUS] 64.00 tries/min, 64 tries in 00:01h, 14344335 to do in 3735:31h, 16 active"
            ),
            Some(Finding::Attempts {
                rate: 64,
                sent: 64,
                left: 14344335,
                elapsed_minutes: 1,
                eta_minutes: 3735 * 60 + 31,
            })
        );
    }

    #[test]
    fn test_hydra_login_and_messages() {
        assert_eq!(
            finding(&HydraParser, "[22][ssh] host: 10.0.0.5   login: root   password: toor 123"),
            Some(Finding::Login {
                port: 22,
                service: "ssh".to_string(),
                address: Some("10.0.0.5".parse().unwrap()),
                login: Some("root".to_string()),
                password: Some("toor 123".to_string()),
            })
        );
        assert_eq!(
            HydraParser.parse("[ERROR] target ssh://10.0.0.5:22/ does not support password auth", StreamKind::Stdout),
            Some(Event::message(
                Severity::Error,
                "target ssh://10.0.0.5:22/ does not support password auth"
            ))
        );
    }
}
