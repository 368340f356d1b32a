//! Error types and failure classification.
//!
//! Operation failures are never fatal: they are classified here, logged by the
//! runner and recorded as failed samples. Only [`ConfigError`] stops a run, and
//! only before any virtual user has been spawned.

use std::fmt;
use thiserror::Error;

/// Why a single operation was recorded as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connection refused, DNS failure, reset while reading the body
    Network,

    /// Request timed out
    Timeout,

    /// TLS handshake or certificate problems
    Tls,

    /// Unexpected status code
    UnexpectedStatus,

    /// Body was not JSON or a required field was missing/wrong
    UnexpectedBody,

    /// Anything else reqwest reports
    Other,
}

impl FailureKind {
    /// Classify a transport-level reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            FailureKind::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() {
            FailureKind::Network
        } else if error.is_decode() {
            FailureKind::UnexpectedBody
        } else {
            let error_msg = error.to_string().to_lowercase();

            if error_msg.contains("certificate")
                || error_msg.contains("tls")
                || error_msg.contains("ssl")
            {
                FailureKind::Tls
            } else if error_msg.contains("timeout") {
                FailureKind::Timeout
            } else if error_msg.contains("dns") || error_msg.contains("connect") {
                FailureKind::Network
            } else {
                FailureKind::Other
            }
        }
    }

    /// Transport failures never produced a response; contract violations did.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FailureKind::Network | FailureKind::Timeout | FailureKind::Tls | FailureKind::Other
        )
    }

    /// Prometheus / log label.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Network => "network_error",
            FailureKind::Timeout => "timeout_error",
            FailureKind::Tls => "tls_error",
            FailureKind::UnexpectedStatus => "unexpected_status",
            FailureKind::UnexpectedBody => "unexpected_body",
            FailureKind::Other => "other_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fatal configuration problems, reported before traffic starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Invalid environment variable {name}: {message}")]
    Env { name: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
