use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chanlink_client::CallId;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    endpoint: &'a str,
    cmd_id: CallId,
    push: bool,
    elapsed_ms: u128,
    data: &'a Value,
    timestamp: String,
}

#[derive(Serialize)]
struct PushOutput<'a> {
    consumer: &'a str,
    data: &'a Value,
    timestamp: String,
}

/// Result of one `call`.
pub struct Reply<'a> {
    pub endpoint: &'a str,
    pub cmd_id: CallId,
    pub push: bool,
    pub elapsed: Duration,
    pub data: &'a Value,
}

pub fn print_reply(reply: &Reply<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                endpoint: reply.endpoint,
                cmd_id: reply.cmd_id,
                push: reply.push,
                elapsed_ms: reply.elapsed.as_millis(),
                data: reply.data,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "CMD_ID", "ELAPSED", "DATA"])
                .add_row(vec![
                    reply.endpoint.to_string(),
                    reply.cmd_id.to_string(),
                    format!("{}ms", reply.elapsed.as_millis()),
                    data_preview(reply.data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} cmd_id={} elapsed={}ms data={}",
                reply.endpoint,
                reply.cmd_id,
                reply.elapsed.as_millis(),
                pretty(reply.data)
            );
        }
        OutputFormat::Raw => print_raw(reply.data),
    }
}

pub fn print_push(consumer: &str, data: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PushOutput {
                consumer,
                data,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONSUMER", "DATA"])
                .add_row(vec![consumer.to_string(), data_preview(data)]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("consumer={consumer} data={}", pretty(data)),
        OutputFormat::Raw => print_raw(data),
    }
}

/// Strings are written bare; everything else as compact JSON.
pub fn print_raw(data: &Value) {
    let mut out = std::io::stdout();
    let _ = match data {
        Value::String(text) => writeln!(out, "{text}"),
        other => writeln!(out, "{other}"),
    };
    let _ = out.flush();
}

fn data_preview(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn pretty(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
