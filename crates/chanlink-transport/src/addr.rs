use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TransportError};

/// A parsed endpoint URL.
///
/// Accepted forms: `tcp://host:port`, `unix:///absolute/path`
/// (`unix:relative/path` is accepted as well) and `ws://` or `wss://` URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddr {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
    /// Full `ws://` or `wss://` URL, one text message per frame.
    WebSocket(String),
}

impl EndpointAddr {
    /// Parse an endpoint URL.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(invalid(url, "url must not be empty"));
        }

        if let Some(rest) = trimmed.strip_prefix("tcp://") {
            let authority = rest.trim_end_matches('/');
            let (host, port) = authority
                .rsplit_once(':')
                .ok_or_else(|| invalid(url, "missing port"))?;
            if host.is_empty() {
                return Err(invalid(url, "missing host"));
            }
            port.parse::<u16>()
                .map_err(|_| invalid(url, "port must be a number between 0 and 65535"))?;
            return Ok(EndpointAddr::Tcp(authority.to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("unix:") {
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(invalid(url, "missing socket path"));
            }
            return Ok(EndpointAddr::Unix(PathBuf::from(path)));
        }

        match trimmed.split_once("://") {
            Some((scheme, rest))
                if scheme.eq_ignore_ascii_case("ws") || scheme.eq_ignore_ascii_case("wss") =>
            {
                let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
                if host.is_empty() {
                    return Err(invalid(url, "missing host"));
                }
                Ok(EndpointAddr::WebSocket(trimmed.to_string()))
            }
            Some((scheme, _)) => Err(invalid(
                url,
                &format!("unsupported scheme '{scheme}' (expected tcp, unix, ws or wss)"),
            )),
            None => Err(invalid(
                url,
                "missing scheme (expected tcp://, unix://, ws:// or wss://)",
            )),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            EndpointAddr::Tcp(_) => "tcp",
            EndpointAddr::Unix(_) => "unix-domain-socket",
            EndpointAddr::WebSocket(_) => "websocket",
        }
    }

    /// True when messages travel as newline-terminated lines.
    pub fn is_line_framed(&self) -> bool {
        !matches!(self, EndpointAddr::WebSocket(_))
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddr::Tcp(authority) => write!(f, "tcp://{authority}"),
            EndpointAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            EndpointAddr::WebSocket(url) => f.write_str(url),
        }
    }
}

impl std::str::FromStr for EndpointAddr {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(url: &str, reason: &str) -> TransportError {
    TransportError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
