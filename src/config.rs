//! Configuration module for deimos

use crate::{DeimosError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeimosConfig {
    /// External tool locations and environment
    pub tools: ToolsConfig,

    /// Process supervision settings
    pub supervisor: SupervisorConfig,

    /// Multi-target attack settings
    pub attack: AttackConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// One external command line tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Binary path, or a bare name looked up on PATH
    pub path: PathBuf,

    /// Arguments placed before the ones each invocation adds
    pub args: Vec<String>,

    /// Working directory for the child
    pub workdir: Option<PathBuf>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Directories appended to PATH for the child
    pub path_extension: Vec<PathBuf>,

    /// Whether the tool may be invoked at all
    pub enabled: bool,
}

impl ToolConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            workdir: None,
            env: HashMap::new(),
            path_extension: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_path_extension<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.path_extension.push(dir.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub nmap: ToolConfig,
    pub arpspoof: ToolConfig,
    pub hydra: ToolConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            nmap: ToolConfig::new("nmap"),
            arpspoof: ToolConfig::new("arpspoof"),
            hydra: ToolConfig::new("hydra"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Time children get to honour SIGTERM on shutdown, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 3000,
        }
    }
}

impl SupervisorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// How often progress is reported while workers run, in milliseconds
    pub progress_interval_ms: u64,

    /// Longest wait for a collaborator's end signal, in seconds
    pub finder_timeout_secs: u64,

    /// Longest wait for cancelled workers to acknowledge, in milliseconds
    pub cancel_grace_ms: u64,

    /// Launch the best RPC exploit once one is found
    pub auto_launch: bool,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 1000,
            finder_timeout_secs: 300,
            cancel_grace_ms: 5000,
            auto_launch: true,
        }
    }
}

impl AttackConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn finder_timeout(&self) -> Duration {
        Duration::from_secs(self.finder_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn with_finder_timeout(mut self, timeout: Duration) -> Self {
        self.finder_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = (grace.as_millis() as u64).max(1);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// env_logger filter used when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DeimosConfig {
    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            DeimosError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DeimosConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default location, `~/.deimos.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deimos.toml")
    }

    /// Load `~/.deimos.toml` if present, defaults otherwise
    pub fn load_default_config() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            log::info!("Loaded config from {}", path.display());
            return Self::from_toml_file(&path);
        }
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.shutdown_grace_ms == 0 {
            return Err(DeimosError::ConfigError(
                "supervisor.shutdown_grace_ms must be greater than 0".to_string(),
            ));
        }
        if self.attack.progress_interval_ms == 0 {
            return Err(DeimosError::ConfigError(
                "attack.progress_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.attack.finder_timeout_secs == 0 {
            return Err(DeimosError::ConfigError(
                "attack.finder_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.attack.cancel_grace_ms == 0 {
            return Err(DeimosError::ConfigError(
                "attack.cancel_grace_ms must be greater than 0".to_string(),
            ));
        }
        for (name, tool) in [
            ("nmap", &self.tools.nmap),
            ("arpspoof", &self.tools.arpspoof),
            ("hydra", &self.tools.hydra),
        ] {
            if tool.enabled && tool.path.as_os_str().is_empty() {
                return Err(DeimosError::ConfigError(format!(
                    "tools.{}.path cannot be empty",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn with_nmap<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.tools.nmap.path = path.into();
        self
    }

    pub fn with_attack(mut self, attack: AttackConfig) -> Self {
        self.attack = attack;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = DeimosConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tools.nmap.path, PathBuf::from("nmap"));
        assert!(config.attack.auto_launch);
    }

    #[test]
    fn test_partial_toml() {
        let config = DeimosConfig::from_toml_str(
            r#"
            [tools.nmap]
            path = "/opt/nmap/bin/nmap"
            args = ["--privileged"]

            [tools.hydra]
            enabled = false

            [attack]
            finder_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.tools.nmap.path, PathBuf::from("/opt/nmap/bin/nmap"));
        assert_eq!(config.tools.nmap.args, vec!["--privileged".to_string()]);
        assert!(!config.tools.hydra.enabled);
        assert_eq!(config.attack.finder_timeout(), Duration::from_secs(30));
        assert_eq!(config.attack.cancel_grace_ms, 5000);
    }

    #[test]
    fn test_zero_grace_rejected() {
        let err = DeimosConfig::from_toml_str("[supervisor]\nshutdown_grace_ms = 0\n").unwrap_err();
        assert!(matches!(err, DeimosError::ConfigError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = DeimosConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file() {
        assert!(DeimosConfig::from_toml_file("/no/such/deimos.toml").is_err());
    }
}
