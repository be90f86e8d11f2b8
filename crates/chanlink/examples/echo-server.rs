//! Minimal line server for trying the client and CLI by hand.
//!
//! Endpoints:
//! - `echo` replies with the call data
//! - `fail` replies with a `ValidationError`
//! - `slow` replies after two seconds
//! - `notify` pushes the call data to the `alerts` consumer
//!
//! Every connection also receives an `alerts` heartbeat push every five seconds.
//!
//! Run with:
//!   cargo run --example echo-server -p chanlink -- 127.0.0.1:8765
//!
//! In another terminal:
//!   cargo run -p chanlink --features cli -- --url tcp://127.0.0.1:8765 \
//!     call echo --json '{"hello":"world"}'
//!   cargo run -p chanlink --features cli -- --url tcp://127.0.0.1:8765 \
//!     listen --consumer alerts --count 2

use std::time::Duration;

use chanlink::transport::LineCodec;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8765".to_string());
    let listener = TcpListener::bind(&addr).await?;
    eprintln!("Listening on tcp://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        eprintln!("Client connected: {peer}");
        tokio::spawn(async move {
            if let Err(e) = serve(stream).await {
                eprintln!("Client {peer} failed: {e}");
            }
            eprintln!("Client disconnected: {peer}");
        });
    }
}

async fn serve(stream: TcpStream) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut sink, mut frames) = Framed::new(stream, LineCodec::new()).split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message.to_string()).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_tx = out_tx.clone();
    let heartbeat = tokio::spawn(async move {
        let mut tick = 0u64;
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.tick().await;
        loop {
            interval.tick().await;
            tick += 1;
            let push = json!({"consumers": ["alerts"], "data": {"heartbeat": tick}});
            if heartbeat_tx.send(push).is_err() {
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        let envelope: Value = match serde_json::from_str(&frame?) {
            Ok(envelope) => envelope,
            Err(e) => {
                eprintln!("Ignoring malformed envelope: {e}");
                continue;
            }
        };
        let cmd_id = envelope["cmd_id"].clone();
        let endpoint = envelope["endpoint"].as_str().unwrap_or_default().to_string();
        if envelope["cancel"] == json!(true) {
            eprintln!("Call {cmd_id} to {endpoint} cancelled");
            continue;
        }
        eprintln!("Call {cmd_id} to {endpoint}");

        let data = envelope["data"].clone();
        match endpoint.as_str() {
            "echo" => {
                let _ = out_tx.send(json!({"cmd_id": cmd_id, "data": data}));
            }
            "fail" => {
                let _ = out_tx.send(json!({
                    "cmd_id": cmd_id,
                    "error": "ValidationError",
                    "error_data": {"endpoint": endpoint}
                }));
            }
            "slow" => {
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    let _ = out_tx.send(json!({"cmd_id": cmd_id, "data": data}));
                });
            }
            "notify" => {
                let _ = out_tx.send(json!({"consumers": ["alerts"], "data": data}));
            }
            _ => {
                let _ = out_tx.send(json!({
                    "msg_type": "service",
                    "error": "UnknownEndpoint",
                    "error_data": {"endpoint": endpoint}
                }));
            }
        }
    }

    heartbeat.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
