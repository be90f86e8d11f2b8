use chanlink_client::config::{ENV_DEBUG, ENV_DEBUG_DATA_REQUEST, ENV_DEBUG_DATA_RESPONSE, ENV_URL};
use chanlink_transport::{EndpointAddr, DEFAULT_MAX_FRAME_LEN};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

/// One sample URL per scheme the stream transport accepts.
const SCHEMES: [(&str, &str); 4] = [
    ("tcp", "tcp://127.0.0.1:1"),
    ("unix", "unix:///tmp/chanlink.sock"),
    ("ws", "ws://localhost/"),
    ("wss", "wss://localhost/"),
];

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("chanlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: chanlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CHANLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    for line in transport_lines() {
        println!("{line}");
    }
    println!("max_frame_len: {DEFAULT_MAX_FRAME_LEN}");
    println!(
        "env: {ENV_URL}, {ENV_DEBUG}, {ENV_DEBUG_DATA_REQUEST}, {ENV_DEBUG_DATA_RESPONSE}"
    );

    Ok(SUCCESS)
}

fn transport_lines() -> Vec<String> {
    SCHEMES
        .iter()
        .filter_map(|(scheme, sample)| {
            let addr = EndpointAddr::parse(sample).ok()?;
            let framing = if addr.is_line_framed() {
                "newline-delimited"
            } else {
                "one message per frame"
            };
            Some(format!(
                "transport.{scheme}: {} ({framing})",
                addr.transport_name()
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_scheme_with_its_framing() {
        assert_eq!(
            transport_lines(),
            vec![
                "transport.tcp: tcp (newline-delimited)",
                "transport.unix: unix-domain-socket (newline-delimited)",
                "transport.ws: websocket (one message per frame)",
                "transport.wss: websocket (one message per frame)",
            ]
        );
    }
}
