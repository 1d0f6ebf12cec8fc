//! Error types for the flight broker.
//!
//! Every variant maps to a JSON-RPC error code and carries enough structured
//! data to be rebuilt on the client side, so a caller sees the same typed
//! failure the broker raised.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the flight broker and its clients.
#[derive(Debug, Error)]
pub enum FlightError {
    // Protocol-level misses and rejections
    #[error("Flight not found: {key}")]
    NotFound { key: String },

    #[error("{action} is not implemented.")]
    NotImplemented { action: String },

    #[error("Unknown action {name:?}")]
    UnknownAction { name: String },

    #[error("Invalid ticket: {message}")]
    InvalidTicket { message: String },

    #[error("Method not found: {0}")]
    UnknownMethod(String),

    // Configuration errors
    #[error("Configuration error for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Invalid transmit method: {method}")]
    InvalidMethod { method: String },

    #[error("Invalid location {uri:?}: {message}")]
    InvalidLocation { uri: String, message: String },

    // Registry errors (never surfaced to RPC callers)
    #[error("Registry connection to {hosts} timed out after {timeout:?}")]
    RegistryTimeout { hosts: String, timeout: Duration },

    #[error("Registry unavailable at {hosts}: {message}")]
    RegistryUnavailable { hosts: String, message: String },

    // Stream and connection errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    /// Error raised by a peer whose code has no local variant.
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, FlightError>;

impl From<std::io::Error> for FlightError {
    fn from(err: std::io::Error) -> Self {
        FlightError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for FlightError {
    fn from(err: serde_json::Error) -> Self {
        FlightError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rustls::Error> for FlightError {
    fn from(err: rustls::Error) -> Self {
        FlightError::Tls {
            message: err.to_string(),
        }
    }
}

impl FlightError {
    /// Create a transport error without an underlying IO cause.
    pub fn transport(message: impl Into<String>) -> Self {
        FlightError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        FlightError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32000: Transport/TLS error
    /// - -32001: Flight not found
    /// - -32002: Action not implemented
    /// - -32003: Unknown action
    /// - -32004: Configuration error
    /// - -32005: Registry unavailable
    /// - -32006: Invalid ticket
    /// - -32007: Invalid transmit method
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            FlightError::Transport { .. } | FlightError::Tls { .. } | FlightError::Io { .. } => {
                -32000
            }
            FlightError::NotFound { .. } => -32001,
            FlightError::NotImplemented { .. } => -32002,
            FlightError::UnknownAction { .. } => -32003,
            FlightError::Config { .. } => -32004,
            FlightError::RegistryTimeout { .. } | FlightError::RegistryUnavailable { .. } => {
                -32005
            }
            FlightError::InvalidTicket { .. } => -32006,
            FlightError::InvalidMethod { .. } => -32007,
            FlightError::UnknownMethod(_) => -32601,
            FlightError::Validation { .. } | FlightError::InvalidLocation { .. } => -32602,
            FlightError::Remote { code, .. } => *code,
            FlightError::Json { .. } | FlightError::Other(_) => -32603,
        }
    }

    /// Structured payload carried in the `data` member of a JSON-RPC error.
    pub fn to_rpc_error_data(&self) -> Option<Value> {
        match self {
            FlightError::NotFound { key } => Some(json!({ "key": key })),
            FlightError::NotImplemented { action } => Some(json!({ "action": action })),
            FlightError::UnknownAction { name } => Some(json!({ "name": name })),
            FlightError::InvalidTicket { message } => Some(json!({ "message": message })),
            FlightError::UnknownMethod(method) => Some(json!({ "method": method })),
            FlightError::Config { key, message } => {
                Some(json!({ "key": key, "message": message }))
            }
            FlightError::InvalidMethod { method } => Some(json!({ "method": method })),
            FlightError::Validation { field, message } => {
                Some(json!({ "field": field, "message": message }))
            }
            _ => None,
        }
    }

    /// Rebuild a typed error from a JSON-RPC error object.
    pub fn from_rpc_error(code: i32, message: String, data: Option<&Value>) -> Self {
        let field = |name: &str| {
            data.and_then(|d| d.get(name))
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        match code {
            -32000 => FlightError::transport(message),
            -32001 => FlightError::NotFound {
                key: field("key").unwrap_or(message),
            },
            -32002 => FlightError::NotImplemented {
                action: field("action").unwrap_or(message),
            },
            -32003 => FlightError::UnknownAction {
                name: field("name").unwrap_or(message),
            },
            -32004 => FlightError::Config {
                key: field("key").unwrap_or_default(),
                message: field("message").unwrap_or(message),
            },
            -32006 => FlightError::InvalidTicket {
                message: field("message").unwrap_or(message),
            },
            -32007 => FlightError::InvalidMethod {
                method: field("method").unwrap_or(message),
            },
            -32601 => FlightError::UnknownMethod(field("method").unwrap_or(message)),
            -32602 if field("field").is_some() => FlightError::Validation {
                field: field("field").unwrap_or_default(),
                message: field("message").unwrap_or(message),
            },
            _ => FlightError::Remote { code, message },
        }
    }

    /// Check whether this error came from the stream/connection layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FlightError::Transport { .. } | FlightError::Io { .. } | FlightError::Tls { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_roundtrip(err: &FlightError) -> FlightError {
        let data = err.to_rpc_error_data();
        FlightError::from_rpc_error(err.to_rpc_error_code(), err.to_string(), data.as_ref())
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            FlightError::NotFound { key: "k".into() }.to_rpc_error_code(),
            -32001
        );
        assert_eq!(
            FlightError::NotImplemented {
                action: "clear".into()
            }
            .to_rpc_error_code(),
            -32002
        );
        assert_eq!(FlightError::Other("x".into()).to_rpc_error_code(), -32603);
        assert_eq!(
            FlightError::UnknownMethod("nope".into()).to_rpc_error_code(),
            -32601
        );
    }

    #[test]
    fn test_not_implemented_and_unknown_action_stay_distinct_over_the_wire() {
        let clear = wire_roundtrip(&FlightError::NotImplemented {
            action: "clear".into(),
        });
        assert!(matches!(clear, FlightError::NotImplemented { ref action } if action == "clear"));

        let unknown = wire_roundtrip(&FlightError::UnknownAction {
            name: "reticulate".into(),
        });
        assert!(
            matches!(unknown, FlightError::UnknownAction { ref name } if name == "reticulate")
        );
    }

    #[test]
    fn test_config_error_keeps_key() {
        let err = wire_roundtrip(&FlightError::Config {
            key: "FLIGHT_URL_OVERLAY".into(),
            message: "not set".into(),
        });
        match err {
            FlightError::Config { key, .. } => assert_eq!(key, "FLIGHT_URL_OVERLAY"),
            other => panic!("Expected Config, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_code_becomes_remote() {
        let err = FlightError::from_rpc_error(-31999, "odd".into(), None);
        assert!(matches!(err, FlightError::Remote { code: -31999, .. }));
    }

    #[test]
    fn test_io_error_is_transport() {
        let err: FlightError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(err.is_transport());
        assert_eq!(err.to_rpc_error_code(), -32000);
    }
}
