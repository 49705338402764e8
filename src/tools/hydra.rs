//! Login cracker wrapper

use super::{EventReceiver, Tool, ToolRun};
use crate::events::{Event, Finding, Severity};
use crate::network::Target;
use crate::Result;
use log::{debug, log};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// A single value or a wordlist file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    Single(String),
    List(PathBuf),
}

/// One cracking run against a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrackRequest {
    pub service: String,
    pub port: u16,
    pub login: Credential,
    pub password: Credential,
    /// Stop at the first valid pair
    pub stop_on_success: bool,
}

impl CrackRequest {
    pub fn new<S: Into<String>>(service: S, port: u16, login: Credential, password: Credential) -> Self {
        Self {
            service: service.into(),
            port,
            login,
            password,
            stop_on_success: true,
        }
    }
}

/// A valid login found by the cracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundLogin {
    pub port: u16,
    pub service: String,
    pub address: Option<IpAddr>,
    pub login: Option<String>,
    pub password: Option<String>,
}

pub trait HydraReceiver: Send + 'static {
    fn on_login_found(&mut self, login: FoundLogin);

    fn on_attempts(&mut self, _rate: u32, _sent: u64, _left: u64, _eta_minutes: u32) {}

    fn on_message(&mut self, severity: Severity, text: String) {
        log!(severity.log_level(), "hydra: {}", text);
    }

    fn on_end(&mut self, _exit_code: i32) {}

    fn on_death(&mut self, _signal: i32) {}
}

#[derive(Debug)]
pub struct HydraEvents<R>(R);

impl<R> HydraEvents<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: HydraReceiver> EventReceiver for HydraEvents<R> {
    fn on_event(&mut self, event: Event) {
        match event {
            Event::ToolFinding(Finding::Login {
                port,
                service,
                address,
                login,
                password,
            }) => self.0.on_login_found(FoundLogin {
                port,
                service,
                address,
                login,
                password,
            }),
            Event::ToolFinding(Finding::Attempts {
                rate,
                sent,
                left,
                eta_minutes,
                ..
            }) => self.0.on_attempts(rate, sent, left, eta_minutes),
            Event::ToolFinding(other) => debug!("hydra: ignoring {} finding", other.kind()),
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

#[derive(Debug, Clone)]
pub struct Hydra {
    tool: Tool,
}

impl Hydra {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn attack<R: HydraReceiver>(
        &self,
        target: &Target,
        request: &CrackRequest,
        receiver: R,
    ) -> Result<ToolRun<HydraEvents<R>>> {
        self.tool
            .run_async(attack_args(target, request), HydraEvents(receiver))
    }
}

fn attack_args(target: &Target, request: &CrackRequest) -> Vec<String> {
    let mut args = Vec::new();
    match &request.login {
        Credential::Single(login) => args.extend(["-l".to_string(), login.clone()]),
        Credential::List(path) => args.extend(["-L".to_string(), path.display().to_string()]),
    }
    match &request.password {
        Credential::Single(password) => args.extend(["-p".to_string(), password.clone()]),
        Credential::List(path) => args.extend(["-P".to_string(), path.display().to_string()]),
    }
    if request.stop_on_success {
        args.push("-f".to_string());
    }
    args.extend(["-s".to_string(), request.port.to_string()]);
    args.push(target.address().to_string());
    args.push(request.service.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_attack_args() {
        let target = Target::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)));
        let request = CrackRequest::new(
            "ssh",
            2222,
            Credential::Single("root".to_string()),
            Credential::List(PathBuf::from("/tmp/words.txt")),
        );
        assert_eq!(
            attack_args(&target, &request),
            vec!["-l", "root", "-P", "/tmp/words.txt", "-f", "-s", "2222", "10.0.0.9", "ssh"]
        );
    }

    #[test]
    fn test_login_routing() {
        #[derive(Default)]
        struct Logins(Vec<FoundLogin>);
        impl HydraReceiver for Logins {
            fn on_login_found(&mut self, login: FoundLogin) {
                self.0.push(login);
            }
        }

        let mut events = HydraEvents(Logins::default());
        events.on_event(Event::ToolFinding(Finding::Login {
            port: 22,
            service: "ssh".to_string(),
            address: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))),
            login: Some("root".to_string()),
            password: Some("toor".to_string()),
        }));
        let logins = events.into_inner().0;
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].password.as_deref(), Some("toor"));
    }
}
