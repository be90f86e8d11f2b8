use std::time::{Duration, Instant};

use chanlink_client::{CallOptions, CancelToken, Client};
use serde_json::Value;
use tracing::{info, warn};

use crate::cmd::{parse_duration, CallArgs, ConnectArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_reply, OutputFormat, Reply};

/// Grace period for queued envelopes to leave before the client is torn down.
const FLUSH_GRACE: Duration = Duration::from_millis(500);

pub async fn run(args: CallArgs, connect: &ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let config = connect.client_config()?;
    let client = Client::connect(config).map_err(|err| client_error("connect failed", err))?;
    client.on_error(|err| warn!(error = %err, "unsolicited error"));

    let token = CancelToken::new();
    let mut options = CallOptions {
        push: args.push,
        ..CallOptions::default()
    }
    .with_token(token.clone());
    if !args.redact.is_empty() {
        let fields = args.redact.clone();
        options = options.with_log_filter(move |data| redact(data, &fields));
    }

    let started = Instant::now();
    let call = client
        .call_with(&args.endpoint, payload, options)
        .map_err(|err| client_error("call failed", err))?;
    let cmd_id = call.cmd_id();

    let outcome = tokio::time::timeout(timeout, async {
        let result = call.await;
        if args.push {
            // Nothing comes back; wait until the envelope has left instead.
            client.flush().await;
        }
        result
    })
    .await;

    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            if token.cancel() {
                info!(%cmd_id, endpoint = %args.endpoint, "call cancelled after timeout");
            }
            let _ = tokio::time::timeout(FLUSH_GRACE, client.flush()).await;
            client.shutdown();
            return Err(CliError::new(
                TIMEOUT,
                format!(
                    "call {cmd_id} to {} timed out after {timeout:?}",
                    args.endpoint
                ),
            ));
        }
    };

    client.shutdown();
    let data = result.map_err(|err| client_error("call failed", err))?;
    print_reply(
        &Reply {
            endpoint: &args.endpoint,
            cmd_id,
            push: args.push,
            elapsed: started.elapsed(),
            data: &data,
        },
        format,
    );
    Ok(SUCCESS)
}

fn resolve_payload(args: &CallArgs) -> CliResult<Value> {
    if let Some(json) = &args.json {
        return serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")));
    }
    if let Some(data) = &args.data {
        return Ok(Value::String(data.clone()));
    }
    Ok(Value::Null)
}

/// Mask top-level object fields named in `fields`.
fn redact(mut data: Value, fields: &[String]) -> Value {
    if let Value::Object(map) = &mut data {
        for field in fields {
            if let Some(value) = map.get_mut(field.as_str()) {
                *value = Value::String("***".to_string());
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(json: Option<&str>, data: Option<&str>) -> CallArgs {
        CallArgs {
            endpoint: "echo".to_string(),
            json: json.map(str::to_string),
            data: data.map(str::to_string),
            timeout: "5s".to_string(),
            push: false,
            redact: Vec::new(),
        }
    }

    #[test]
    fn payload_sources() {
        assert_eq!(
            resolve_payload(&args(Some(r#"{"x":1}"#), None)).unwrap(),
            json!({"x": 1})
        );
        assert_eq!(
            resolve_payload(&args(None, Some("hello"))).unwrap(),
            json!("hello")
        );
        assert_eq!(resolve_payload(&args(None, None)).unwrap(), Value::Null);
        assert_eq!(
            resolve_payload(&args(Some("{nope"), None)).unwrap_err().code,
            USAGE
        );
    }

    #[test]
    fn redacts_named_fields_only() {
        let fields = vec!["password".to_string(), "token".to_string()];
        assert_eq!(
            redact(json!({"user": "ann", "password": "hunter2"}), &fields),
            json!({"user": "ann", "password": "***"})
        );
        assert_eq!(redact(json!([1, 2]), &fields), json!([1, 2]));
    }
}
