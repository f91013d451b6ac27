//! Error types for the HaaS network control plane
//!
//! Every error carries an explicit [`ErrorKind`] so callers (most notably the
//! REST layer) can branch on the category of a failure without matching on
//! individual variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Switch Failure Context
// =============================================================================

/// A single failed switch call inside a reconciliation batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchFailure {
    /// Switch group that rejected the call
    pub switch: String,
    /// Port the call was applied to (`group::port`)
    pub port: String,
    /// Driver-supplied reason
    pub reason: String,
}

impl std::fmt::Display for SwitchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on switch {}: {}", self.port, self.switch, self.reason)
    }
}

fn describe_failures(failures: &[SwitchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{kind} already exists: {name}")]
    Duplicate { kind: String, name: String },

    #[error("{kind} {name} is in use: {reason}")]
    Blocked {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource exhausted: no free identifiers left in pool {pool}")]
    ResourceExhausted { pool: String },

    // =========================================================================
    // Switch Errors
    // =========================================================================
    #[error("Switch apply failed: {}", describe_failures(.failures))]
    SwitchApply {
        /// Every failed call in the batch
        failures: Vec<SwitchFailure>,
        /// Ports whose calls were acknowledged before the batch finished
        committed: Vec<String>,
    },

    // =========================================================================
    // Client Errors
    // =========================================================================
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response ({status}): {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    BadArgument,
    NotFound,
    Duplicate,
    Blocked,
    ResourceExhausted,
    Configuration,
    SwitchApply,
    Transport,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::BadArgument => "bad_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Blocked => "blocked",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Configuration => "configuration",
            ErrorKind::SwitchApply => "switch_apply",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Tag identifying the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::BadArgument(_) => ErrorKind::BadArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Duplicate { .. } => ErrorKind::Duplicate,
            Error::Blocked { .. } => ErrorKind::Blocked,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Error::Configuration(_) | Error::YamlParse(_) => ErrorKind::Configuration,
            Error::SwitchApply { .. } => ErrorKind::SwitchApply,
            Error::Api { .. }
            | Error::Server { .. }
            | Error::UnexpectedStatus { .. }
            | Error::Http(_) => ErrorKind::Transport,
            Error::Internal(_) | Error::JsonParse(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the request itself was at fault (4xx family)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Authorization
                | ErrorKind::BadArgument
                | ErrorKind::NotFound
                | ErrorKind::Duplicate
                | ErrorKind::Blocked
        )
    }

    /// Check if re-driving the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SwitchApply { .. }
            | Error::ResourceExhausted { .. }
            | Error::Http(_)
            | Error::Server { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn not_found(kind: &str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    pub(crate) fn duplicate(kind: &str, name: impl Into<String>) -> Self {
        Error::Duplicate {
            kind: kind.to_string(),
            name: name.into(),
        }
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::BadArgument("projects may not choose a network_id".into());
        assert_eq!(err.kind(), ErrorKind::BadArgument);
        assert!(err.is_client_error());

        let err = Error::Authorization("denied".into());
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_ne!(err.kind(), ErrorKind::BadArgument);

        let err = Error::ResourceExhausted { pool: "vlan".into() };
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_error_retryable() {
        let err = Error::SwitchApply {
            failures: vec![SwitchFailure {
                switch: "1".into(),
                port: "1::3".into(),
                reason: "timed out".into(),
            }],
            committed: vec![],
        };
        assert!(err.is_retryable());
        assert!(!err.is_client_error());

        let err = Error::Blocked {
            kind: "network".into(),
            name: "pxe".into(),
            reason: "1 connection(s)".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_switch_apply_message_lists_every_failure() {
        let err = Error::SwitchApply {
            failures: vec![
                SwitchFailure {
                    switch: "0".into(),
                    port: "0::2".into(),
                    reason: "port down".into(),
                },
                SwitchFailure {
                    switch: "2".into(),
                    port: "2::1".into(),
                    reason: "timed out".into(),
                },
            ],
            committed: vec!["1::1".into()],
        };
        let message = err.to_string();
        assert!(message.contains("0::2 on switch 0: port down"));
        assert!(message.contains("2::1 on switch 2: timed out"));
    }
}
