//! Custom error types for Surfacer
//!
//! Provides structured error handling with context propagation
//! and user-friendly error messages.
//!
//! Only [`SessionError::AuthenticationFailed`] aborts a run. Everything else
//! degrades gracefully and is tallied in [`ErrorCounts`] so the operator can
//! judge how complete the coverage was.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Surfacer operations
#[derive(Error, Debug)]
pub enum SurfacerError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session / authentication errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Transport errors that escaped the retry layer
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Word/vector list errors
    #[error("List error: {0}")]
    List(#[from] ListError),

    /// The seed URL could not be used as a target
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Configuration directory could not be determined")]
    NoConfigDir,
}

/// Raw transport failures reported by a session provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection reset: {0}")]
    Reset(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether the failure is worth a bounded retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Reset(_)
        )
    }
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The target rejected the current session. Handled internally by a
    /// single re-authentication.
    #[error("Session expired (status {status})")]
    Expired { status: u16 },

    /// No usable session could be established. Fatal.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unknown session provider: {0}")]
    UnknownProvider(String),
}

/// List loading errors
#[derive(Error, Debug)]
pub enum ListError {
    #[error("Failed to read list file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("List file is empty: {0}")]
    Empty(String),
}

/// Occurrence counts for the non-fatal error classes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    /// Requests that still failed after retries
    pub transport_failures: usize,
    /// Responses whose body could not be parsed as HTML
    pub malformed_responses: usize,
    /// Links that resolved outside the target origin
    pub scope_violations: usize,
    /// Times the session was refreshed after expiring
    pub session_refreshes: usize,
}

impl ErrorCounts {
    pub fn merge(&mut self, other: &ErrorCounts) {
        self.transport_failures += other.transport_failures;
        self.malformed_responses += other.malformed_responses;
        self.scope_violations += other.scope_violations;
        self.session_refreshes += other.session_refreshes;
    }

    pub fn total(&self) -> usize {
        self.transport_failures
            + self.malformed_responses
            + self.scope_violations
            + self.session_refreshes
    }
}

impl SurfacerError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SurfacerError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            SurfacerError::Session(e) => format!("Session problem: {}", e.user_hint()),
            SurfacerError::Transport(e) => format!("Network issue: {}", e.user_hint()),
            SurfacerError::List(e) => format!("Input list problem: {}", e.user_hint()),
            SurfacerError::InvalidTarget(url) => {
                format!("'{}' is not a valid target. Use a full http(s) URL.", url)
            }
            SurfacerError::Io(e) => format!("File system issue: {}", e),
        }
    }

    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SurfacerError::Transport(_))
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::NoConfigDir => {
                "Could not locate a configuration directory. Pass --config explicitly.".into()
            }
        }
    }
}

impl UserHint for TransportError {
    fn user_hint(&self) -> String {
        match self {
            TransportError::Connect(_) => {
                "Could not connect to the target. Check if it's running and accessible.".into()
            }
            TransportError::Timeout(ms) => {
                format!("Request timed out after {}ms. The target may be slow or unresponsive.", ms)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for SessionError {
    fn user_hint(&self) -> String {
        match self {
            SessionError::AuthenticationFailed(_) => {
                "Authentication failed. Check the target is reachable and the credentials are valid.".into()
            }
            SessionError::UnknownProvider(name) => {
                format!("No custom authentication named '{}'. Available: dvwa.", name)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for ListError {
    fn user_hint(&self) -> String {
        match self {
            ListError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check the path passed on the command line.", path)
            }
            ListError::Empty(path) => format!("'{}' contains no usable entries.", path),
        }
    }
}
