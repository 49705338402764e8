//! Network mapper wrapper

use super::{EventReceiver, Tool, ToolRun};
use crate::events::{Event, Finding, Severity};
use crate::network::{Port, Protocol, Target};
use crate::Result;
use log::{debug, log};
use std::time::Duration;

/// Callbacks for mapper findings. Every method has a no-op default so
/// receivers implement only what they record.
pub trait NmapReceiver: Send + 'static {
    fn on_port_found(&mut self, _port: u16, _protocol: Protocol) {}

    fn on_service_found(&mut self, _port: Port) {}

    fn on_os_found(&mut self, _os: String) {}

    fn on_device_found(&mut self, _device_type: String) {}

    fn on_hop_found(&mut self, _hop: u16, _address: String, _rtt: Option<Duration>) {}

    fn on_message(&mut self, severity: Severity, text: String) {
        log!(severity.log_level(), "nmap: {}", text);
    }

    fn on_end(&mut self, _exit_code: i32) {}

    fn on_death(&mut self, _signal: i32) {}
}

/// Routes classified events to an [`NmapReceiver`]
#[derive(Debug)]
pub struct NmapEvents<R>(R);

impl<R> NmapEvents<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: NmapReceiver> EventReceiver for NmapEvents<R> {
    fn on_event(&mut self, event: Event) {
        match event {
            Event::ToolFinding(Finding::Port { port, protocol }) => self.0.on_port_found(port, protocol),
            Event::ToolFinding(Finding::Service {
                port,
                protocol,
                service,
                version,
            }) => {
                let mut found = Port::new(port, protocol).with_service(service);
                if let Some(version) = version {
                    found = found.with_version(version);
                }
                self.0.on_service_found(found)
            }
            Event::ToolFinding(Finding::Os { os }) => self.0.on_os_found(os),
            Event::ToolFinding(Finding::Device { device_type }) => self.0.on_device_found(device_type),
            Event::ToolFinding(Finding::Hop { hop, address, rtt }) => self.0.on_hop_found(hop, address, rtt),
            Event::ToolFinding(other) => debug!("nmap: ignoring {} finding", other.kind()),
            Event::LogMessage { severity, text } => self.0.on_message(severity, text),
        }
    }

    fn on_end(&mut self, exit_code: i32) {
        self.0.on_end(exit_code)
    }

    fn on_death(&mut self, signal: i32) {
        self.0.on_death(signal)
    }
}

/// The nmap network mapper
#[derive(Debug, Clone)]
pub struct Nmap {
    tool: Tool,
}

impl Nmap {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// SYN scan for open ports, optionally restricted to `ports`
    /// (nmap port syntax, e.g. `1-1024`)
    pub fn syn_scan<R: NmapReceiver>(
        &self,
        target: &Target,
        receiver: R,
        ports: Option<&str>,
    ) -> Result<ToolRun<NmapEvents<R>>> {
        let mut args = vec!["-sS", "-Pn", "-n", "-v", "--open"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        if let Some(ports) = ports {
            args.push("-p".to_string());
            args.push(ports.to_string());
        }
        args.push(target.command_line_representation());
        self.tool.run_async(args, NmapEvents(receiver))
    }

    /// Service, version and OS detection. With `focus_on_known_ports` only
    /// ports already recorded on the target are probed.
    pub fn inspect<R: NmapReceiver>(
        &self,
        target: &Target,
        receiver: R,
        focus_on_known_ports: bool,
    ) -> Result<ToolRun<NmapEvents<R>>> {
        let mut args = vec!["-sV", "-O", "--osscan-guess", "-Pn", "-n", "--open"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        if focus_on_known_ports && target.has_open_ports() {
            if target.ports().iter().any(|p| p.protocol == Protocol::Udp) {
                args.push("-sS".to_string());
                args.push("-sU".to_string());
            }
            args.push("-p".to_string());
            args.push(port_list(target));
        }
        args.push(target.command_line_representation());
        self.tool.run_async(args, NmapEvents(receiver))
    }

    /// Route discovery towards the target
    pub fn trace<R: NmapReceiver>(&self, target: &Target, receiver: R) -> Result<ToolRun<NmapEvents<R>>> {
        let args = vec![
            "-sn".to_string(),
            "-n".to_string(),
            "--traceroute".to_string(),
            target.command_line_representation(),
        ];
        self.tool.run_async(args, NmapEvents(receiver))
    }
}

/// Known ports of a target in nmap's `T:..,U:..` syntax
pub fn port_list(target: &Target) -> String {
    let mut tcp = Vec::new();
    let mut udp = Vec::new();
    for port in target.ports() {
        match port.protocol {
            Protocol::Udp => udp.push(port.number.to_string()),
            _ => tcp.push(port.number.to_string()),
        }
    }

    let mut parts = Vec::new();
    if !tcp.is_empty() {
        parts.push(format!("T:{}", tcp.join(",")));
    }
    if !udp.is_empty() {
        parts.push(format!("U:{}", udp.join(",")));
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[derive(Default)]
    struct Recorder {
        ports: Vec<(u16, Protocol)>,
        services: Vec<Port>,
        os: Option<String>,
        ended: Option<i32>,
    }

    impl NmapReceiver for Recorder {
        fn on_port_found(&mut self, port: u16, protocol: Protocol) {
            self.ports.push((port, protocol));
        }

        fn on_service_found(&mut self, port: Port) {
            self.services.push(port);
        }

        fn on_os_found(&mut self, os: String) {
            self.os = Some(os);
        }

        fn on_end(&mut self, exit_code: i32) {
            self.ended = Some(exit_code);
        }
    }

    #[test]
    fn test_event_routing() {
        let mut events = NmapEvents(Recorder::default());
        events.on_event(Event::ToolFinding(Finding::Port {
            port: 22,
            protocol: Protocol::Tcp,
        }));
        events.on_event(Event::ToolFinding(Finding::Service {
            port: 22,
            protocol: Protocol::Tcp,
            service: "ssh".to_string(),
            version: Some("OpenSSH 9.6".to_string()),
        }));
        events.on_event(Event::ToolFinding(Finding::Os {
            os: "Linux 6.X".to_string(),
        }));
        events.on_event(Event::message(Severity::Info, "Starting Nmap"));
        events.on_end(0);

        let recorder = events.into_inner();
        assert_eq!(recorder.ports, vec![(22, Protocol::Tcp)]);
        assert_eq!(recorder.services[0].version.as_deref(), Some("OpenSSH 9.6"));
        assert_eq!(recorder.os.as_deref(), Some("Linux 6.X"));
        assert_eq!(recorder.ended, Some(0));
    }

    #[test]
    fn test_port_list() {
        let mut target = Target::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        target.add_open_port(Port::new(22, Protocol::Tcp));
        target.add_open_port(Port::new(80, Protocol::Tcp));
        target.add_open_port(Port::new(53, Protocol::Udp));
        assert_eq!(port_list(&target), "T:22,80,U:53");
    }
}
