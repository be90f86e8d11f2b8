use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigError;
use crate::ids::CallId;

/// Error kind carried by calls rejected through a [`CancelToken`](crate::CancelToken).
pub const CANCELLED_ERROR: &str = "CancelledError";

/// Error kind carried by calls that could not be delivered or settled.
pub const DISCONNECTED_ERROR: &str = "DisconnectedError";

/// Structured error reported by the remote side: an error kind plus optional data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointError {
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

impl EndpointError {
    pub fn new(error: impl Into<String>, data: Value) -> Self {
        Self {
            error: error.into(),
            data,
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data.is_null() {
            write!(f, "{}", self.error)
        } else {
            write!(f, "{} ({})", self.error, self.data)
        }
    }
}

impl std::error::Error for EndpointError {}

/// Errors returned by client operations and rejected calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The remote endpoint answered the call with an error.
    #[error("endpoint error: {0}")]
    Remote(EndpointError),

    /// The call was cancelled locally.
    #[error("call {cmd_id} cancelled")]
    Cancelled { cmd_id: CallId },

    /// The call could not be sent or settled because the link is gone.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Call data could not be serialized.
    #[error("failed to serialize call data: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A call result could not be decoded into the requested type.
    #[error("failed to decode call result: {0}")]
    Decode(#[source] serde_json::Error),

    /// No consumer is registered under this name.
    #[error("consumer {0} not found")]
    ConsumerNotFound(String),

    /// Consumer registration was rejected.
    #[error("invalid consumer registration: {0}")]
    InvalidConsumer(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chanlink_transport::TransportError),

    /// Startup configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The client was created outside a tokio runtime.
    #[error("no tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl ClientError {
    /// Error kind string, matching the remote `error` field for remote errors.
    pub fn kind(&self) -> &str {
        match self {
            ClientError::Remote(err) => &err.error,
            ClientError::Cancelled { .. } => CANCELLED_ERROR,
            ClientError::Disconnected(_) => DISCONNECTED_ERROR,
            ClientError::Serialize(_) => "SerializeError",
            ClientError::Decode(_) => "DecodeError",
            ClientError::ConsumerNotFound(_) => "ConsumerNotFound",
            ClientError::InvalidConsumer(_) => "InvalidConsumer",
            ClientError::Transport(_) => "TransportError",
            ClientError::Config(_) => "ConfigError",
            ClientError::Runtime(_) => "RuntimeError",
        }
    }

    /// True for locally cancelled calls.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors with no owning call, delivered to every `on_error` listener.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportedError {
    /// An inbound message was not valid JSON.
    #[error("response parse json error: {message}")]
    Parse { message: String },

    /// An inbound message was JSON but matched no known envelope shape.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The backend reported an error on the service channel.
    #[error("service error: {0}")]
    Service(EndpointError),

    /// A push named a consumer that is not registered.
    #[error("consumer {name} not found")]
    ConsumerNotFound { name: String },

    /// A consumer handler panicked while handling a push.
    #[error("consumer {name} panicked: {message}")]
    ConsumerPanicked { name: String, message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn endpoint_error_display_includes_data() {
        let plain = EndpointError::new("NotFound", Value::Null);
        assert_eq!(plain.to_string(), "NotFound");

        let detailed = EndpointError::new("ValidationError", json!({"field": "name"}));
        assert_eq!(detailed.to_string(), "ValidationError ({\"field\":\"name\"})");
    }

    #[test]
    fn kinds() {
        let remote = ClientError::Remote(EndpointError::new("PermissionDenied", Value::Null));
        assert_eq!(remote.kind(), "PermissionDenied");

        let cancelled = ClientError::Cancelled {
            cmd_id: CallId::new(3),
        };
        assert_eq!(cancelled.kind(), CANCELLED_ERROR);
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.to_string(), "call 3 cancelled");
    }
}
