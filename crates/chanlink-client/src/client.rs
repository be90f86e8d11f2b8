use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use chanlink_transport::{check_len, StreamTransport, Transport, TransportError, TransportEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ClientConfig, ClientOptions};
use crate::consumer::ConsumerRegistry;
use crate::envelope::OutboundEnvelope;
use crate::error::{ClientError, ReportedError, Result};
use crate::events::{ConnectionEvent, ListenerId, Listeners};
use crate::gate::ReadinessGate;
use crate::ids::{CallId, CallIdGenerator};
use crate::pending::{PendingRecord, PendingTable};
use crate::token::CancelToken;

/// Transforms a copy of request data before it is logged.
pub type LogFilter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Per-call options for [`Client::call_with`].
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Fire and forget: no pending record, no reply expected.
    pub push: bool,
    /// Token that can cancel this call.
    pub token: Option<CancelToken>,
    /// Applied to a clone of the data before request payload logging.
    pub log_filter: Option<LogFilter>,
}

impl CallOptions {
    pub fn push() -> Self {
        Self {
            push: true,
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_log_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.log_filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("push", &self.push)
            .field("token", &self.token)
            .field("log_filter", &self.log_filter.is_some())
            .finish()
    }
}

/// An envelope waiting in the outbox.
struct Queued {
    cmd_id: CallId,
    text: String,
    /// True when a pending record waits on this send.
    correlated: bool,
}

enum Outgoing {
    Envelope(Queued),
    Flush(oneshot::Sender<()>),
}

/// State shared by client handles, cancel tokens and background tasks.
pub(crate) struct Shared {
    pub(crate) options: ClientOptions,
    ids: CallIdGenerator,
    pub(crate) pending: Mutex<PendingTable>,
    pub(crate) consumers: Mutex<ConsumerRegistry>,
    pub(crate) connectivity: Listeners<ConnectionEvent>,
    pub(crate) errors: Listeners<ReportedError>,
    outbox: mpsc::UnboundedSender<Outgoing>,
    stop: CancellationToken,
    transport: Arc<dyn Transport>,
}

impl Shared {
    fn enqueue(&self, queued: Queued) -> Result<()> {
        self.outbox
            .send(Outgoing::Envelope(queued))
            .map_err(|_| ClientError::Disconnected("client outbox closed".to_string()))
    }

    /// Cancel a pending call. Returns false if it already settled.
    pub(crate) fn cancel_call(&self, cmd_id: CallId) -> bool {
        let record = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(cmd_id);
        let Some(record) = record else {
            return false;
        };

        let notice = OutboundEnvelope::cancel(record.endpoint(), cmd_id);
        match notice.to_text() {
            Ok(text) => {
                let queued = Queued {
                    cmd_id,
                    text,
                    correlated: false,
                };
                if self.enqueue(queued).is_err() {
                    warn!(%cmd_id, "cancel notice not queued");
                }
            }
            Err(err) => warn!(%cmd_id, error = %err, "cancel notice not serialized"),
        }

        if self.options.debug_logging {
            debug!(
                %cmd_id,
                elapsed = record.elapsed().as_secs_f64(),
                "<- [{cmd_id}] {} cancelled",
                record.endpoint()
            );
        }
        record.settle(Err(ClientError::Cancelled { cmd_id }));
        true
    }

    /// Reject a call whose envelope could not be delivered.
    fn fail_send(&self, queued: &Queued, error: ClientError) {
        warn!(cmd_id = %queued.cmd_id, error = %error, "queued send failed");
        if !queued.correlated {
            return;
        }
        let record = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(queued.cmd_id);
        if let Some(record) = record {
            record.settle(Err(error));
        }
    }

    fn reject_all(&self, reason: &str) -> usize {
        let drained = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        let count = drained.len();
        for (_, record) in drained {
            record.settle(Err(ClientError::Disconnected(reason.to_string())));
        }
        count
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop.cancel();
        self.transport.close();
    }
}

/// Correlation and dispatch engine over a persistent transport.
///
/// Cheap to clone; all clones share the same pending calls, consumers and
/// listeners. Background tasks stop and the transport closes when the last
/// clone is dropped.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Start the engine over `transport`. Must be called within a tokio runtime.
    pub fn new(transport: impl Transport, options: ClientOptions) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let events = transport.take_events()?;
        let gate = ReadinessGate::new(transport.watch_state());
        let (outbox, queue) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let shared = Arc::new(Shared {
            options,
            ids: CallIdGenerator::new(),
            pending: Mutex::new(PendingTable::new()),
            consumers: Mutex::new(ConsumerRegistry::new()),
            connectivity: Listeners::new(),
            errors: Listeners::new(),
            outbox,
            stop: stop.clone(),
            transport: transport.clone(),
        });

        runtime.spawn(run_inbound(Arc::downgrade(&shared), events, stop.clone()));
        runtime.spawn(run_outbox(
            Arc::downgrade(&shared),
            transport,
            gate,
            queue,
            stop,
        ));
        Ok(Self { shared })
    }

    /// Validate `config`, open a reconnecting stream transport and start the engine.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let addr = config.validate()?;
        // Checked before spawning the transport, which also needs a runtime.
        tokio::runtime::Handle::try_current()?;
        let transport = StreamTransport::spawn(addr, config.transport.clone());
        Self::new(transport, config.client_options())
    }

    /// Call `endpoint` and wait for its reply.
    pub fn call(&self, endpoint: &str, data: impl Serialize) -> Result<PendingCall> {
        self.call_with(endpoint, data, CallOptions::default())
    }

    /// Send to `endpoint` without expecting a reply.
    pub fn push(&self, endpoint: &str, data: impl Serialize) -> Result<CallId> {
        self.call_with(endpoint, data, CallOptions::push())
            .map(|call| call.cmd_id())
    }

    /// Issue a call.
    ///
    /// Returns once the envelope is queued; the send itself waits for the
    /// transport to be open. Serialization failures and envelopes longer than
    /// the transport's message limit are returned here, before anything is
    /// recorded or sent. With `push` set the returned future is already
    /// resolved to `null`.
    pub fn call_with(
        &self,
        endpoint: &str,
        data: impl Serialize,
        options: CallOptions,
    ) -> Result<PendingCall> {
        let cmd_id = self.shared.ids.next_id();
        let data = serde_json::to_value(data).map_err(ClientError::Serialize)?;
        let envelope = OutboundEnvelope::call(endpoint, cmd_id, data);
        let text = envelope.to_text().map_err(ClientError::Serialize)?;
        if let Some(max) = self.shared.transport.max_message_len() {
            check_len(&text, max)?;
        }

        let state = if options.push {
            CallState::Ready(Some(Ok(Value::Null)))
        } else {
            let (tx, rx) = oneshot::channel();
            self.shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(cmd_id, PendingRecord::new(endpoint, tx));
            CallState::Waiting(rx)
        };

        if let Some(token) = &options.token {
            token.attach(cmd_id, Arc::downgrade(&self.shared));
        }
        self.log_call(&envelope, &options);

        let queued = Queued {
            cmd_id,
            text,
            correlated: !options.push,
        };
        if let Err(err) = self.shared.enqueue(queued) {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(cmd_id);
            return Err(err);
        }
        Ok(PendingCall { cmd_id, state })
    }

    fn log_call(&self, envelope: &OutboundEnvelope, options: &CallOptions) {
        let opts = &self.shared.options;
        if !opts.debug_logging {
            return;
        }
        let (cmd_id, endpoint, push) = (envelope.cmd_id, &envelope.endpoint, options.push);
        if opts.log_request_payloads {
            let data = match &options.log_filter {
                Some(filter) => filter(envelope.data.clone()),
                None => envelope.data.clone(),
            };
            debug!(%cmd_id, push, %data, "-> [{cmd_id}] {endpoint}");
        } else {
            debug!(%cmd_id, push, "-> [{cmd_id}] {endpoint}");
        }
    }

    /// Register `handler` for pushes naming `name`. Replaces any previous handler.
    pub fn register_consumer<F>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, Arc::new(handler))
    }

    pub fn unregister_consumer(&self, name: &str) -> bool {
        self.shared
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(name)
    }

    /// Registered consumer names, sorted.
    pub fn consumers(&self) -> Vec<String> {
        self.shared
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
    }

    /// Run `handler` on every transition of the given kind.
    pub fn on_connectivity<F>(&self, kind: ConnectionEvent, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .connectivity
            .subscribe(Arc::new(move |event: &ConnectionEvent| {
                if *event == kind {
                    handler()
                }
            }))
    }

    pub fn off_connectivity(&self, id: ListenerId) -> bool {
        self.shared.connectivity.unsubscribe(id)
    }

    /// Run `handler` for every error with no owning call.
    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ReportedError) + Send + Sync + 'static,
    {
        self.shared.errors.subscribe(Arc::new(handler))
    }

    pub fn off_error(&self, id: ListenerId) -> bool {
        self.shared.errors.unsubscribe(id)
    }

    /// Route one inbound text message as if the transport had delivered it.
    pub fn route(&self, raw: &str) {
        self.shared.route(raw);
    }

    /// Identifiers of calls still waiting for a reply, ascending.
    pub fn pending_calls(&self) -> Vec<CallId> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ids()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_ready()
    }

    /// Wait until everything queued before this call has been sent or failed.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.outbox.send(Outgoing::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Close the transport for good and reject every pending call.
    pub fn shutdown(&self) {
        self.shared.transport.close();
        let rejected = self.shared.reject_all("client shut down");
        debug!(rejected, "client shut down");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.shared.transport.state())
            .field("pending", &self.pending_calls().len())
            .field("consumers", &self.consumers())
            .field("connectivity_listeners", &self.shared.connectivity.len())
            .field("error_listeners", &self.shared.errors.len())
            .finish()
    }
}

enum CallState {
    Waiting(oneshot::Receiver<Result<Value>>),
    Ready(Option<Result<Value>>),
}

/// Future for the reply to one call.
///
/// Dropping it does not cancel the call; use a [`CancelToken`] for that.
pub struct PendingCall {
    cmd_id: CallId,
    state: CallState,
}

impl PendingCall {
    pub fn cmd_id(&self) -> CallId {
        self.cmd_id
    }

    /// Wait for the reply and decode it into `T`.
    pub async fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.await?;
        serde_json::from_value(value).map_err(ClientError::Decode)
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CallState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(ClientError::Disconnected("call polled after completion".to_string()))
            })),
            CallState::Waiting(rx) => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| {
                    Err(ClientError::Disconnected("client dropped".to_string()))
                })
            }),
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("cmd_id", &self.cmd_id)
            .finish()
    }
}

async fn run_inbound(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(engine) = shared.upgrade() else {
            break;
        };
        engine.handle_event(event);
    }
    debug!("inbound task stopped");
}

async fn run_outbox(
    shared: Weak<Shared>,
    transport: Arc<dyn Transport>,
    mut gate: ReadinessGate,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    stop: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = stop.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let queued = match item {
            Outgoing::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            Outgoing::Envelope(queued) => queued,
        };

        let outcome = tokio::select! {
            _ = stop.cancelled() => break,
            outcome = deliver(transport.as_ref(), &mut gate, &queued.text) => outcome,
        };
        if let Err(err) = outcome {
            if let Some(shared) = shared.upgrade() {
                let error = if err.is_message_rejected() {
                    ClientError::Transport(err)
                } else {
                    ClientError::Disconnected(err.to_string())
                };
                shared.fail_send(&queued, error);
            }
        }
    }

    queue.close();
    while let Ok(item) = queue.try_recv() {
        match item {
            Outgoing::Flush(done) => {
                let _ = done.send(());
            }
            Outgoing::Envelope(queued) => {
                if let Some(shared) = shared.upgrade() {
                    shared.fail_send(&queued, ClientError::Disconnected("client stopped".to_string()));
                }
            }
        }
    }
    debug!("outbox task stopped");
}

/// Send `text` once the gate opens, retrying after the next open if the link
/// dropped between the readiness check and the send.
async fn deliver(
    transport: &dyn Transport,
    gate: &mut ReadinessGate,
    text: &str,
) -> std::result::Result<(), TransportError> {
    loop {
        match gate.when_ready(|| transport.send(text)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(TransportError::NotReady)) => {
                gate.changed().await.map_err(|_| TransportError::Shutdown)?;
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(TransportError::Shutdown),
        }
    }
}
