//! Error types for knowledge-mcp.
//!
//! Each layer owns its error enum. Protocol-level failures are mapped to
//! JSON-RPC error envelopes by the router; collaborator failures
//! ([`ServiceError`]) are turned into business-level results by the tool
//! registry and never escape as protocol errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Failures reported by an external collaborator (search, catalog, health,
/// analytics).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The requested entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "collection".
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The collaborator could not be reached.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        /// Name of the unavailable service.
        service: String,
        /// Why it is unavailable.
        reason: String,
    },

    /// The collaborator rejected its input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ServiceError {
    /// Shorthand for a missing collection.
    #[must_use]
    pub fn collection_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "collection",
            id: id.into(),
        }
    }

    /// Shorthand for a missing document.
    #[must_use]
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "document",
            id: id.into(),
        }
    }

    /// Shorthand for an unreachable collaborator.
    #[must_use]
    pub fn unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a transport or while delivering frames to a session.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Reading from or writing to the underlying stream failed.
    #[error("transport I/O error")]
    Io(#[from] std::io::Error),

    /// Could not bind the HTTP listener.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The session does not exist (never created, closed or expired).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session's outbound channel has been closed.
    #[error("session channel closed: {0}")]
    Closed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn service_error_display() {
        assert_eq!(
            ServiceError::collection_not_found("docs").to_string(),
            "collection not found: docs"
        );
        assert_eq!(
            ServiceError::unavailable("health", "connection refused").to_string(),
            "health unavailable: connection refused"
        );
    }

    #[test]
    fn transport_error_display() {
        let error = TransportError::SessionNotFound("abc".to_string());
        assert!(error.to_string().contains("abc"));
    }
}
