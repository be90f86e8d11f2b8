use std::fmt;
use std::io;

use chanlink_client::{ClientError, ConfigError};
use chanlink_transport::TransportError;

// Process exit codes. 124 matches timeout(1); 64 is sysexits EX_USAGE.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidUrl { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::FrameTooLarge { .. }
        | TransportError::InvalidUtf8
        | TransportError::EmbeddedNewline => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(USAGE, format!("{context}: {err}"))
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Remote(remote) => CliError::new(FAILURE, format!("{context}: {remote}")),
        ClientError::Cancelled { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ClientError::Disconnected(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ClientError::Serialize(_) | ClientError::Decode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ClientError::ConsumerNotFound(_) | ClientError::InvalidConsumer(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Config(err) => config_error(context, err),
        ClientError::Runtime(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use chanlink_client::EndpointError;
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn remote_errors_exit_with_failure_and_kind() {
        let err = client_error(
            "call failed",
            ClientError::Remote(EndpointError::new("ValidationError", json!({"field": "x"}))),
        );
        assert_eq!(err.code, FAILURE);
        assert_eq!(
            err.message,
            "call failed: ValidationError ({\"field\":\"x\"})"
        );

        let plain = client_error(
            "call failed",
            ClientError::Remote(EndpointError::new("NotFound", Value::Null)),
        );
        assert_eq!(plain.message, "call failed: NotFound");
    }

    #[test]
    fn maps_local_failures() {
        assert_eq!(
            client_error("x", ClientError::Disconnected("gone".into())).code,
            TRANSPORT_ERROR
        );
        assert_eq!(
            client_error("x", ClientError::Config(ConfigError::MissingEndpointUrl)).code,
            USAGE
        );
        assert_eq!(
            transport_error(
                "x",
                TransportError::InvalidUrl {
                    url: "http://a".into(),
                    reason: "unsupported scheme".into()
                }
            )
            .code,
            USAGE
        );
        assert_eq!(
            transport_error(
                "x",
                TransportError::Io(io::Error::from(io::ErrorKind::PermissionDenied))
            )
            .code,
            PERMISSION_DENIED
        );
        assert_eq!(
            client_error(
                "x",
                ClientError::Transport(TransportError::FrameTooLarge { size: 90, max: 64 })
            )
            .code,
            DATA_INVALID
        );
    }
}
