use std::time::Duration;

use chanlink_client::ClientConfig;
use chanlink_transport::StreamConfig;
use clap::{Args, Subcommand};

use crate::exit::{config_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call an endpoint and print its reply.
    Call(CallArgs),
    /// Register consumers and print the pushes they receive.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Connection settings shared by commands that talk to an endpoint.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Endpoint URL (tcp://host:port, unix:///path, ws://host/path or wss://host/path).
    #[arg(long, env = "CHANLINK_URL", global = true)]
    pub url: Option<String>,

    /// Log every call and reply at debug level.
    #[arg(long, global = true)]
    pub debug_calls: bool,

    /// Consecutive failed connection attempts before giving up.
    #[arg(long, value_name = "N", default_value = "3", global = true)]
    pub connect_retries: u32,
}

impl ConnectArgs {
    /// Build the client configuration. `CHANLINK_DEBUG*` variables are honoured
    /// the same way as in [`ClientConfig::from_env`].
    pub fn client_config(&self) -> CliResult<ClientConfig> {
        let url = self.url.clone();
        let mut config = ClientConfig::from_lookup(|name| match name {
            chanlink_client::config::ENV_URL => url.clone(),
            other => std::env::var(other).ok(),
        })
        .map_err(|err| config_error("invalid configuration", err))?;

        config.debug_logging |= self.debug_calls;
        config.transport = StreamConfig {
            max_retries: Some(self.connect_retries),
            ..StreamConfig::default()
        };
        Ok(config)
    }
}

pub fn run(command: Command, connect: &ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => block_on(call::run(args, connect, format)),
        Command::Listen(args) => block_on(listen::run(args, connect, format)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: std::future::Future<Output = CliResult<i32>>,
{
    // Single-threaded: background tasks only start at the command's first
    // await, so consumers and listeners registered before it see every event.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    runtime.block_on(future)
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Endpoint name.
    pub endpoint: String,
    /// JSON payload.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// String payload.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms). The call is
    /// cancelled when it expires.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Send without waiting for a reply.
    #[arg(long)]
    pub push: bool,
    /// Top-level payload fields to mask in debug logs (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub redact: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Consumer names to register (repeatable or comma-separated).
    #[arg(long = "consumer", required = true, value_delimiter = ',')]
    pub consumers: Vec<String>,
    /// Exit after receiving N pushes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn missing_url_is_a_usage_error() {
        let err = ConnectArgs::default().client_config().unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn builds_config_with_retry_limit() {
        let args = ConnectArgs {
            url: Some("tcp://127.0.0.1:4000".to_string()),
            debug_calls: true,
            connect_retries: 7,
        };
        let config = args.client_config().unwrap();
        assert_eq!(config.endpoint_url, "tcp://127.0.0.1:4000");
        assert!(config.debug_logging);
        assert_eq!(config.transport.max_retries, Some(7));
    }
}
