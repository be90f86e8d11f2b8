use chanlink_client::{Client, ConnectionEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::{ConnectArgs, ListenArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_push, OutputFormat};

pub async fn run(args: ListenArgs, connect: &ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = connect.client_config()?;
    // A listener keeps reconnecting until interrupted.
    config.transport.max_retries = None;
    let client = Client::connect(config).map_err(|err| client_error("connect failed", err))?;

    let running = CancellationToken::new();
    install_ctrlc_handler(running.clone())?;

    client.on_connectivity(ConnectionEvent::Connected, || info!("listening"));
    client.on_connectivity(ConnectionEvent::Disconnected, || {
        warn!("connection lost, reconnecting")
    });
    client.on_error(|err| warn!(error = %err, "unsolicited error"));

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    for name in &args.consumers {
        let tx = tx.clone();
        let consumer = name.clone();
        client
            .register_consumer(name.as_str(), move |data| {
                let _ = tx.send((consumer.clone(), data));
            })
            .map_err(|err| client_error("consumer registration failed", err))?;
    }
    drop(tx);

    let mut printed = 0usize;
    loop {
        let (consumer, data) = tokio::select! {
            _ = running.cancelled() => break,
            push = rx.recv() => match push {
                Some(push) => push,
                None => break,
            },
        };

        print_push(&consumer, &data, format);
        printed = printed.saturating_add(1);
        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    client.shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || running.cancel())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
