//! ARP spoofer wrapper

use super::{EventReceiver, Tool, ToolRun};
use crate::events::{Event, Severity};
use crate::network::{Target, TargetKind};
use crate::Result;
use log::debug;
use std::net::IpAddr;

pub trait ArpSpoofReceiver: Send + 'static {
    fn on_error(&mut self, text: String);

    fn on_end(&mut self, _exit_code: i32) {}

    fn on_death(&mut self, _signal: i32) {}
}

#[derive(Debug)]
pub struct ArpSpoofEvents<R>(R);

impl<R> ArpSpoofEvents<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: ArpSpoofReceiver> EventReceiver for ArpSpoofEvents<R> {
    fn on_event(&mut self, event: Event) {
        match event {
            Event::LogMessage {
                severity: Severity::Error | Severity::Fatal,
                text,
            } => self.0.on_error(text),
            other => debug!("arpspoof: {}", other),
        }
    }

    fn on_end(&mut self, exit_code: i32) {
        self.0.on_end(exit_code)
    }

    fn on_death(&mut self, signal: i32) {
        self.0.on_death(signal)
    }
}

/// Poisons the ARP caches of a target and the gateway. Runs until killed.
#[derive(Debug, Clone)]
pub struct ArpSpoof {
    tool: Tool,
}

impl ArpSpoof {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn spoof<R: ArpSpoofReceiver>(
        &self,
        target: &Target,
        gateway: IpAddr,
        interface: &str,
        receiver: R,
    ) -> Result<ToolRun<ArpSpoofEvents<R>>> {
        self.tool
            .run_async(spoof_args(target, gateway, interface), ArpSpoofEvents(receiver))
    }
}

/// A network target spoofs every host, so `-t` is left out
fn spoof_args(target: &Target, gateway: IpAddr, interface: &str) -> Vec<String> {
    let mut args = vec!["-i".to_string(), interface.to_string()];
    if let TargetKind::Endpoint = target.kind() {
        args.push("-t".to_string());
        args.push(target.address().to_string());
    }
    args.push(gateway.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const GATEWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

    #[test]
    fn test_endpoint_args() {
        let target = Target::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(
            spoof_args(&target, GATEWAY, "wlan0"),
            vec!["-i", "wlan0", "-t", "192.168.1.20", "192.168.1.1"]
        );
    }

    #[test]
    fn test_network_args_omit_target() {
        let target = Target::network(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 0)), 24);
        assert_eq!(
            spoof_args(&target, GATEWAY, "wlan0"),
            vec!["-i", "wlan0", "192.168.1.1"]
        );
    }

    #[test]
    fn test_only_errors_reach_receiver() {
        #[derive(Default)]
        struct Errors(Vec<String>);
        impl ArpSpoofReceiver for Errors {
            fn on_error(&mut self, text: String) {
                self.0.push(text);
            }
        }

        let mut events = ArpSpoofEvents(Errors::default());
        events.on_event(Event::message(Severity::Info, "0:11:22:33:44:55 ff:ff:ff:ff:ff:ff 0806 42"));
        events.on_event(Event::message(Severity::Error, "couldn't arp for host 192.168.1.20"));
        assert_eq!(events.into_inner().0, vec!["couldn't arp for host 192.168.1.20"]);
    }
}
