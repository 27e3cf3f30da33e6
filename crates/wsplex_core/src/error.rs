//! Error types for the wsplex core.
//!
//! Configuration problems, send failures, handler failures and engine/transport
//! failures each get their own enum so callers can match on exactly the failure
//! class they care about.

use thiserror::Error;

/// Configuration validation errors.
///
/// Produced by the `validate()` methods on the configuration records and by
/// every constructor that accepts a configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} configuration is missing required field '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("{kind} configuration '{id}' has an invalid value for '{field}': {reason}")]
    InvalidValue {
        kind: &'static str,
        id: String,
        field: &'static str,
        reason: String,
    },
    #[error("Unknown max connections strategy: {0}")]
    UnknownStrategy(String),
}

/// Errors raised while delivering a packet to a connector.
///
/// This is `Clone` so the same failure can be stored in an [`IoFuture`](crate::IoFuture)
/// and handed to every listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Connector {0} is not connected")]
    NotConnected(String),
    #[error("Unable to deliver packet to connector {connector_id}: {reason}")]
    Undeliverable {
        connector_id: String,
        reason: String,
    },
}

/// Errors returned by filters, plug-ins and listeners.
///
/// These never escape the dispatch path; they are reported to the server's
/// dispatch observer and the chain continues.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Handler execution error: {0}")]
    Handler(String),
    #[error("Send error: {0}")]
    Send(#[from] SendError),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// Engine and server level errors.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error on engine {engine_id}: {reason}")]
    Transport { engine_id: String, reason: String },
    #[error("Engine {0} is not running")]
    EngineNotRunning(String),
    #[error("Connector {0} stopped while starting")]
    ConnectorStopped(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConfigError::MissingField {
            kind: "engine",
            field: "id",
        };
        assert_eq!(
            err.to_string(),
            "engine configuration is missing required field 'id'"
        );

        let err = SendError::NotConnected("n1.4000.7".to_string());
        assert!(err.to_string().contains("n1.4000.7"));

        let dispatch: DispatchError = err.into();
        assert!(matches!(dispatch, DispatchError::Send(_)));
    }
}
