//! Wire envelopes.
//!
//! Outbound: `{"endpoint": str, "cmd_id": int, "data": any, "cancel"?: true}`.
//!
//! Inbound, discriminated in this order:
//! 1. `msg_type == "service"`: service message
//! 2. truthy `cmd_id`: correlated reply (`7`, `7.0` and `"7"` all name call 7)
//! 3. otherwise: consumer push (`consumers` + `data`)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReportedError;
use crate::ids::CallId;

/// `msg_type` value marking service messages.
pub const SERVICE_MSG_TYPE: &str = "service";

/// Envelope sent for every call and cancellation notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub endpoint: String,
    pub cmd_id: CallId,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
}

impl OutboundEnvelope {
    /// A call envelope.
    pub fn call(endpoint: impl Into<String>, cmd_id: CallId, data: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            cmd_id,
            data,
            cancel: false,
        }
    }

    /// A cancellation notice for a previously sent call.
    pub fn cancel(endpoint: impl Into<String>, cmd_id: CallId) -> Self {
        Self {
            endpoint: endpoint.into(),
            cmd_id,
            data: Value::Null,
            cancel: true,
        }
    }

    /// Serialize to compact JSON text.
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Service-channel message with no owning call.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMessage {
    pub error: Option<String>,
    pub error_data: Value,
    pub data: Value,
}

/// Reply correlated to a call by `cmd_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub cmd_id: CallId,
    pub error: Option<String>,
    pub error_data: Value,
    pub data: Value,
}

/// Unsolicited push for one or more named consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerPush {
    pub consumers: Vec<String>,
    pub data: Value,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Service(ServiceMessage),
    Reply(Reply),
    /// A truthy `cmd_id` that can never match a local call.
    UnmatchedReply(Value),
    Push(ConsumerPush),
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(default)]
    msg_type: Value,
    #[serde(default)]
    cmd_id: Value,
    #[serde(default)]
    error: Value,
    #[serde(default)]
    error_data: Value,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    consumers: Option<Vec<String>>,
}

impl Inbound {
    /// Parse and classify one inbound text message.
    pub fn parse(raw: &str) -> Result<Self, ReportedError> {
        let raw: RawInbound = serde_json::from_str(raw).map_err(|err| ReportedError::Parse {
            message: err.to_string(),
        })?;

        if raw.msg_type.as_str() == Some(SERVICE_MSG_TYPE) {
            return Ok(Inbound::Service(ServiceMessage {
                error: error_text(&raw.error),
                error_data: raw.error_data,
                data: raw.data,
            }));
        }

        if is_truthy(&raw.cmd_id) {
            let Some(id) = call_id_of(&raw.cmd_id) else {
                return Ok(Inbound::UnmatchedReply(raw.cmd_id));
            };
            return Ok(Inbound::Reply(Reply {
                cmd_id: CallId::new(id),
                error: error_text(&raw.error),
                error_data: raw.error_data,
                data: raw.data,
            }));
        }

        let consumers = raw.consumers.ok_or_else(|| ReportedError::Protocol {
            message: "message has neither a cmd_id nor a consumers list".to_string(),
        })?;
        Ok(Inbound::Push(ConsumerPush {
            consumers,
            data: raw.data,
        }))
    }
}

/// Call number named by a `cmd_id`: a positive integer, an integral float,
/// or the canonical decimal string of one. `"07"` and `" 7"` name nothing.
fn call_id_of(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            let float = number.as_f64()?;
            // Above 2^53 a float no longer names a single integer.
            (float.fract() == 0.0 && float > 0.0 && float <= 9_007_199_254_740_992.0)
                .then_some(float as u64)
        }),
        Value::String(text) => text
            .parse::<u64>()
            .ok()
            .filter(|id| id.to_string() == *text),
        _ => None,
    };
    id.filter(|id| *id > 0)
}

/// JSON truthiness: `null`, `false`, `0` and `""` are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn error_text(value: &Value) -> Option<String> {
    if !is_truthy(value) {
        return None;
    }
    Some(match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}
