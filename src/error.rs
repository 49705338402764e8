//! Error handling for the deimos supervisor and attack pipeline
//!
//! Subprocess failures are converted into stage interruptions inside the
//! stage runners; only coarse outcomes ever reach the orchestrator's caller.

use thiserror::Error;

/// Main error type for supervision and orchestration
#[derive(Debug, Error)]
pub enum DeimosError {
    #[error("cannot start '{command}': {source}")]
    ProcessNotStarted {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process supervisor is closed")]
    SupervisorClosed,

    #[error("stage interrupted: {0}")]
    StageInterrupted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("tool disabled: {0}")]
    ToolDisabled(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for deimos operations
pub type DeimosResult<T> = Result<T, DeimosError>;

impl DeimosError {
    /// Shorthand for a stage interruption with a formatted reason
    pub fn interrupted<S: Into<String>>(reason: S) -> Self {
        DeimosError::StageInterrupted(reason.into())
    }

    /// True for user or system initiated cancellation, which is never
    /// reported as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DeimosError::Cancelled)
    }

    /// True when the OS could not create the process at all
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            DeimosError::ProcessNotStarted { .. } | DeimosError::SupervisorClosed
        )
    }
}

impl From<std::num::ParseIntError> for DeimosError {
    fn from(err: std::num::ParseIntError) -> Self {
        DeimosError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for DeimosError {
    fn from(err: toml::de::Error) -> Self {
        DeimosError::ConfigError(format!("Failed to parse TOML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_failure() {
        assert!(DeimosError::Cancelled.is_cancellation());
        assert!(!DeimosError::interrupted("nmap died").is_cancellation());
    }

    #[test]
    fn test_spawn_failure_message() {
        let err = DeimosError::ProcessNotStarted {
            command: "/nope/nmap -sS".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        assert!(err.is_spawn_failure());
        assert!(err.to_string().contains("/nope/nmap -sS"));
    }

    #[test]
    fn test_parse_int_conversion() {
        let err: DeimosError = "abc".parse::<u16>().unwrap_err().into();
        assert!(matches!(err, DeimosError::ParseError(_)));
    }
}
