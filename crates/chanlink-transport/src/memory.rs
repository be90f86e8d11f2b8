use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::codec::check_len;
use crate::error::Result;
use crate::link::LinkCore;
use crate::traits::{LinkState, Transport, TransportEvent};

/// In-process transport whose link is driven by a [`MemoryRemote`].
///
/// Starts in [`LinkState::Connecting`]; nothing is accepted until the remote
/// side calls [`MemoryRemote::open`].
pub struct MemoryTransport {
    link: Arc<LinkCore>,
    sent_tx: mpsc::UnboundedSender<String>,
    max_message_len: Option<usize>,
}

/// The far side of a [`MemoryTransport`].
pub struct MemoryRemote {
    link: Arc<LinkCore>,
    sent_rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create a connected transport/remote pair.
    pub fn pair() -> (MemoryTransport, MemoryRemote) {
        let link = Arc::new(LinkCore::new());
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                link: link.clone(),
                sent_tx,
                max_message_len: None,
            },
            MemoryRemote { link, sent_rx },
        )
    }

    /// Refuse messages longer than `max` bytes.
    pub fn with_max_message_len(mut self, max: usize) -> Self {
        self.max_message_len = Some(max);
        self
    }
}

impl Transport for MemoryTransport {
    fn send(&self, text: &str) -> Result<()> {
        if let Some(max) = self.max_message_len {
            check_len(text, max)?;
        }
        if !self.link.state().is_open() {
            return Err(self.link.not_ready());
        }
        self.sent_tx
            .send(text.to_string())
            .map_err(|_| self.link.not_ready())
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }

    fn max_message_len(&self) -> Option<usize> {
        self.max_message_len
    }

    fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.link.watch()
    }

    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        self.link.take_events()
    }

    fn close(&self) {
        self.link.closed(LinkState::Shutdown);
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("state", &self.link.state())
            .finish()
    }
}

impl MemoryRemote {
    /// Open the link.
    pub fn open(&self) {
        self.link.opened();
    }

    /// Drop the connection; the link goes to `Reconnecting`.
    pub fn drop_connection(&self) {
        self.link.closed(LinkState::Reconnecting);
    }

    /// Close the link for good.
    pub fn shutdown(&self) {
        self.link.closed(LinkState::Shutdown);
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Deliver an inbound text message to the transport's consumer.
    pub fn deliver(&self, text: impl Into<String>) {
        self.link.message(text.into());
    }

    /// Wait for the next message the local side sent.
    pub async fn recv_sent(&mut self) -> Option<String> {
        self.sent_rx.recv().await
    }

    /// Next already-sent message, if any.
    pub fn try_recv_sent(&mut self) -> Option<String> {
        self.sent_rx.try_recv().ok()
    }
}
