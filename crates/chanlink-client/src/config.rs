use chanlink_transport::{EndpointAddr, StreamConfig, TransportError};

/// Environment variable holding the endpoint URL.
pub const ENV_URL: &str = "CHANLINK_URL";
/// Environment variable enabling per-call debug logging.
pub const ENV_DEBUG: &str = "CHANLINK_DEBUG";
/// Environment variable enabling request payload logging.
pub const ENV_DEBUG_DATA_REQUEST: &str = "CHANLINK_DEBUG_DATA_REQUEST";
/// Environment variable enabling response payload logging.
pub const ENV_DEBUG_DATA_RESPONSE: &str = "CHANLINK_DEBUG_DATA_RESPONSE";

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("endpoint url is required (set CHANLINK_URL)")]
    MissingEndpointUrl,

    #[error("invalid boolean for {var}: {value:?}")]
    InvalidBool { var: String, value: String },

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[source] TransportError),
}

/// Logging switches passed to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Emit a debug line for every call, reply and cancellation.
    pub debug_logging: bool,
    /// Include request payloads in call debug lines.
    pub log_request_payloads: bool,
    /// Include response payloads in reply debug lines.
    pub log_response_payloads: bool,
}

/// Configuration for [`Client::connect`](crate::Client::connect).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// `tcp://host:port`, `unix:///path`, `ws://...` or `wss://...`.
    pub endpoint_url: String,
    pub debug_logging: bool,
    pub log_request_payloads: bool,
    pub log_response_payloads: bool,
    /// Reconnection and framing settings passed through to the transport.
    pub transport: StreamConfig,
}

impl ClientConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn with_payload_logging(mut self, requests: bool, responses: bool) -> Self {
        self.log_request_payloads = requests;
        self.log_response_payloads = responses;
        self
    }

    pub fn with_transport(mut self, transport: StreamConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Read configuration from `CHANLINK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_url = lookup(ENV_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingEndpointUrl)?;
        let flag = |var: &str| match lookup(var) {
            Some(value) => parse_bool(var, &value),
            None => Ok(false),
        };

        let config = Self {
            endpoint_url,
            debug_logging: flag(ENV_DEBUG)?,
            log_request_payloads: flag(ENV_DEBUG_DATA_REQUEST)?,
            log_response_payloads: flag(ENV_DEBUG_DATA_RESPONSE)?,
            transport: StreamConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the URL and return the parsed address.
    pub fn validate(&self) -> Result<EndpointAddr, ConfigError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::MissingEndpointUrl);
        }
        EndpointAddr::parse(self.endpoint_url.trim()).map_err(ConfigError::InvalidUrl)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            debug_logging: self.debug_logging,
            log_request_payloads: self.log_request_payloads,
            log_response_payloads: self.log_response_payloads,
        }
    }
}

/// Parse `1/true/yes/on` and `0/false/no/off`, case-insensitively.
pub fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}
