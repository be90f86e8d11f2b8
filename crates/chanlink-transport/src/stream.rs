use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::addr::EndpointAddr;
use crate::codec::{check_len, LineCodec, DEFAULT_MAX_FRAME_LEN};
use crate::error::{Result, TransportError};
use crate::link::LinkCore;
use crate::traits::{LinkState, Transport, TransportEvent};

/// Time allowed for a polite close when the transport shuts down.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Reconnection and framing settings for [`StreamTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the reconnection delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: u32,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Timeout for a single connection attempt, handshake included.
    pub connect_timeout: Duration,
    /// Maximum message length in bytes, in both directions.
    pub max_frame_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2,
            max_retries: None,
            connect_timeout: Duration::from_secs(4),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl StreamConfig {
    /// Delay before reconnection attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_factor.max(1).saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Text transport over TCP, a Unix domain socket or a WebSocket that
/// reconnects with exponential backoff until closed.
///
/// TCP and Unix links carry newline-terminated lines; WebSocket links carry
/// one text message per frame.
pub struct StreamTransport {
    addr: EndpointAddr,
    max_frame_len: usize,
    link: Arc<LinkCore>,
    writer: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    shutdown: CancellationToken,
}

impl StreamTransport {
    /// Start connecting in the background and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(addr: EndpointAddr, config: StreamConfig) -> Self {
        let link = Arc::new(LinkCore::new());
        let writer = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();
        let max_frame_len = config.max_frame_len;

        let supervisor = Supervisor {
            addr: addr.clone(),
            config,
            link: link.clone(),
            writer: writer.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(supervisor.run());

        Self {
            addr,
            max_frame_len,
            link,
            writer,
            shutdown,
        }
    }

    /// Parse `url` and start connecting.
    pub fn connect_url(url: &str, config: StreamConfig) -> Result<Self> {
        Ok(Self::spawn(EndpointAddr::parse(url)?, config))
    }

    /// Endpoint this transport connects to.
    pub fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    /// Refuse text the connection could never carry.
    fn check(&self, text: &str) -> Result<()> {
        if self.addr.is_line_framed() {
            LineCodec::with_max_frame_len(self.max_frame_len).check(text)
        } else {
            check_len(text, self.max_frame_len)
        }
    }
}

impl Transport for StreamTransport {
    fn send(&self, text: &str) -> Result<()> {
        self.check(text)?;
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.as_ref() {
            Some(tx) if self.link.state().is_open() => tx
                .send(text.to_string())
                .map_err(|_| TransportError::NotReady),
            _ => Err(self.link.not_ready()),
        }
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }

    fn max_message_len(&self) -> Option<usize> {
        Some(self.max_frame_len)
    }

    fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.link.watch()
    }

    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        self.link.take_events()
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("addr", &self.addr)
            .field("state", &self.link.state())
            .finish()
    }
}

struct Supervisor {
    addr: EndpointAddr,
    config: StreamConfig,
    link: Arc<LinkCore>,
    writer: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    shutdown: CancellationToken,
}

enum SessionEnd {
    Disconnected,
    Shutdown,
}

impl Supervisor {
    async fn run(self) {
        let mut failures: u32 = 0;

        loop {
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                attempt = self.connect_once() => attempt,
            };

            match attempt {
                Ok(end) => {
                    failures = 0;
                    if matches!(end, SessionEnd::Shutdown) {
                        break;
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    warn!(addr = %self.addr, attempt = failures, error = %err, "connection attempt failed");
                    if self
                        .config
                        .max_retries
                        .is_some_and(|max| failures > max)
                    {
                        warn!(addr = %self.addr, "giving up after {} failed attempts", failures);
                        break;
                    }
                }
            }

            self.link.closed(LinkState::Reconnecting);
            let delay = self.config.backoff(failures.max(1));
            debug!(addr = %self.addr, ?delay, "reconnecting");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.clear_writer();
        self.link.closed(LinkState::Shutdown);
        info!(addr = %self.addr, "transport shut down");
    }

    async fn connect_once(&self) -> Result<SessionEnd> {
        let timeout = self.config.connect_timeout;
        match &self.addr {
            EndpointAddr::Tcp(authority) => {
                let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(authority))
                    .await
                    .map_err(|_| self.connect_error(std::io::ErrorKind::TimedOut.into()))?
                    .map_err(|err| self.connect_error(err))?;
                let _ = stream.set_nodelay(true);
                Ok(self.serve_lines(stream).await)
            }
            #[cfg(unix)]
            EndpointAddr::Unix(path) => {
                let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path))
                    .await
                    .map_err(|_| self.connect_error(std::io::ErrorKind::TimedOut.into()))?
                    .map_err(|err| self.connect_error(err))?;
                Ok(self.serve_lines(stream).await)
            }
            #[cfg(not(unix))]
            EndpointAddr::Unix(_) => Err(self.connect_error(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            ))),
            EndpointAddr::WebSocket(url) => {
                let ws_config = WebSocketConfig::default()
                    .max_message_size(Some(self.config.max_frame_len))
                    .max_frame_size(Some(self.config.max_frame_len));
                let handshake =
                    tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), true);
                let (socket, _response) = tokio::time::timeout(timeout, handshake)
                    .await
                    .map_err(|_| self.connect_error(std::io::ErrorKind::TimedOut.into()))??;

                let (sink, stream) = socket.split();
                let sink = sink
                    .sink_map_err(TransportError::from)
                    .with(|text: String| future::ready(Ok::<_, TransportError>(WsMessage::text(text))));
                let frames = stream.filter_map(|message| future::ready(ws_text(message)));
                Ok(self.pump(sink, frames).await)
            }
        }
    }

    async fn serve_lines<S>(&self, stream: S) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let framed = Framed::new(
            stream,
            LineCodec::with_max_frame_len(self.config.max_frame_len),
        );
        let (sink, frames) = framed.split();
        self.pump(sink, frames).await
    }

    /// Publish a writer, report the link open and move text both ways until
    /// the connection ends or the transport shuts down.
    async fn pump<Tx, Rx>(&self, mut sink: Tx, mut frames: Rx) -> SessionEnd
    where
        Tx: Sink<String, Error = TransportError> + Unpin,
        Rx: Stream<Item = Result<String>> + Unpin,
    {
        let (tx, mut outgoing) = mpsc::unbounded_channel::<String>();

        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        info!(addr = %self.addr, transport = self.addr.transport_name(), "connection open");
        self.link.opened();

        let end = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break SessionEnd::Shutdown,
                Some(text) = outgoing.recv() => match sink.send(text).await {
                    Ok(()) => {}
                    // One unframeable message must not cost every other caller its reply.
                    Err(err) if err.is_message_rejected() => {
                        warn!(addr = %self.addr, error = %err, "outbound message refused");
                    }
                    Err(err) => {
                        warn!(addr = %self.addr, error = %err, "write failed");
                        break SessionEnd::Disconnected;
                    }
                },
                frame = frames.next() => match frame {
                    Some(Ok(text)) => self.link.message(text),
                    Some(Err(err)) => {
                        warn!(addr = %self.addr, error = %err, "read failed");
                        break SessionEnd::Disconnected;
                    }
                    None => {
                        debug!(addr = %self.addr, "connection closed by peer");
                        break SessionEnd::Disconnected;
                    }
                },
            }
        };

        self.clear_writer();
        if matches!(end, SessionEnd::Shutdown) {
            let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
        }
        info!(addr = %self.addr, "connection closed");
        end
    }

    fn clear_writer(&self) {
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn connect_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Connect {
            addr: self.addr.to_string(),
            source,
        }
    }
}

/// Text carried by one WebSocket message. Control frames are answered by
/// the protocol layer and yield nothing here.
fn ws_text(
    message: std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String>> {
    match message {
        Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(WsMessage::Binary(bytes)) => {
            Some(String::from_utf8(bytes.to_vec()).map_err(|_| TransportError::InvalidUtf8))
        }
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_)) => {
            None
        }
        Err(err) => Some(Err(err.into())),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            ..StreamConfig::default()
        }
    }

    async fn wait_for_state(transport: &StreamTransport, wanted: LinkState) {
        let mut state = transport.watch_state();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == wanted))
            .await
            .expect("state change should happen in time")
            .expect("state sender should be alive");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = StreamConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_factor: 2,
            ..StreamConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn exchanges_lines_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            write
                .write_all(format!("echo:{line}\n").as_bytes())
                .await
                .unwrap();
        });

        let transport = StreamTransport::connect_url(&format!("tcp://127.0.0.1:{port}"), fast_config())
            .unwrap();
        let mut events = transport.take_events().unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        transport.send("{\"cmd_id\":1}").unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("echo:{\"cmd_id\":1}".to_string()))
        );

        server.await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        transport.close();
        wait_for_state(&transport, LinkState::Shutdown).await;
    }

    #[tokio::test]
    async fn reconnects_after_peer_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (mut second, _) = listener.accept().await.unwrap();
            second.write_all(b"after-reconnect\n").await.unwrap();
            second
        });

        let transport = StreamTransport::connect_url(&format!("tcp://127.0.0.1:{port}"), fast_config())
            .unwrap();
        let mut events = transport.take_events().unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("after-reconnect".to_string()))
        );

        let _second = server.await.unwrap();
        transport.close();
        wait_for_state(&transport, LinkState::Shutdown).await;
        assert!(matches!(transport.send("x"), Err(TransportError::Shutdown)));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        // Bind then drop to obtain a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = StreamTransport::connect_url(
            &format!("tcp://127.0.0.1:{port}"),
            StreamConfig {
                max_retries: Some(2),
                ..fast_config()
            },
        )
        .unwrap();

        wait_for_state(&transport, LinkState::Shutdown).await;
        assert!(matches!(transport.send("x"), Err(TransportError::Shutdown)));
    }

    #[test]
    fn connect_url_rejects_unknown_scheme() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let result = StreamTransport::connect_url("http://localhost/ws", StreamConfig::default());
            assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
        });
    }

    #[tokio::test]
    async fn refused_send_keeps_connection_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if write
                    .write_all(format!("echo:{line}\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let transport = StreamTransport::connect_url(
            &format!("tcp://127.0.0.1:{port}"),
            StreamConfig {
                max_frame_len: 32,
                ..fast_config()
            },
        )
        .unwrap();
        assert_eq!(transport.max_message_len(), Some(32));
        let mut events = transport.take_events().unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        assert!(matches!(
            transport.send(&"x".repeat(64)),
            Err(TransportError::FrameTooLarge { size: 64, max: 32 })
        ));
        assert!(matches!(
            transport.send("a\nb"),
            Err(TransportError::EmbeddedNewline)
        ));

        transport.send("small").unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("echo:small".to_string()))
        );
        assert_eq!(transport.state(), LinkState::Open);
        assert!(events.try_recv().is_err());

        transport.close();
        wait_for_state(&transport, LinkState::Shutdown).await;
        server.abort();
    }

    #[tokio::test]
    async fn exchanges_text_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let WsMessage::Text(text) = message {
                    let reply = format!("echo:{}", text.as_str());
                    ws.send(WsMessage::text(reply)).await.unwrap();
                    break;
                }
            }
            ws.close(None).await.unwrap();
        });

        let transport =
            StreamTransport::connect_url(&format!("ws://127.0.0.1:{port}/socket"), fast_config())
                .unwrap();
        let mut events = transport.take_events().unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        // Frames delimit messages, so raw newlines pass through intact.
        transport.send("line one\nline two").unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("echo:line one\nline two".to_string()))
        );

        server.await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        transport.close();
        wait_for_state(&transport, LinkState::Shutdown).await;
    }

    #[tokio::test]
    async fn websocket_refuses_oversized_text() {
        let transport = StreamTransport::connect_url(
            "ws://127.0.0.1:9/never",
            StreamConfig {
                max_frame_len: 8,
                max_retries: Some(0),
                ..fast_config()
            },
        )
        .unwrap();
        assert!(matches!(
            transport.send("0123456789"),
            Err(TransportError::FrameTooLarge { size: 10, max: 8 })
        ));
        transport.close();
    }
}
