use tokio::sync::{mpsc, watch};

use crate::error::Result;

/// Connection state of a transport link.
///
/// `Shutdown` is terminal: a link in that state never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// First connection attempt in progress.
    Connecting,
    /// Connected; `send` accepts messages.
    Open,
    /// Connection lost; the transport is trying to reopen it.
    Reconnecting,
    /// Closed for good.
    Shutdown,
}

impl LinkState {
    /// True when the link accepts outbound messages.
    pub fn is_open(self) -> bool {
        self == LinkState::Open
    }

    /// True when the link will never reopen.
    pub fn is_terminal(self) -> bool {
        self == LinkState::Shutdown
    }

    /// Short lowercase name for diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events reported by a transport, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link transitioned to open.
    Opened,
    /// A previously open link closed.
    Closed,
    /// One inbound text message.
    Message(String),
}

/// A persistent, possibly self-reconnecting text link.
///
/// Transports own their reconnection policy entirely. Consumers only see
/// readiness (`state`/`watch_state`) and the ordered event stream.
pub trait Transport: Send + Sync + 'static {
    /// Hand one text message to the live connection.
    ///
    /// Returns [`TransportError::NotReady`](crate::TransportError::NotReady) when the
    /// link is not open and [`TransportError::Shutdown`](crate::TransportError::Shutdown)
    /// once it is closed for good. A message the link can never carry (too long,
    /// or unframeable) is refused with its own error and leaves the link untouched.
    /// Never blocks.
    fn send(&self, text: &str) -> Result<()>;

    /// Current link state.
    fn state(&self) -> LinkState;

    /// Whether `send` would currently be accepted.
    fn is_ready(&self) -> bool {
        self.state().is_open()
    }

    /// Largest message `send` accepts, in bytes. `None` means unlimited.
    fn max_message_len(&self) -> Option<usize> {
        None
    }

    /// Subscribe to link state changes.
    fn watch_state(&self) -> watch::Receiver<LinkState>;

    /// Take the inbound event stream. Only one consumer may take it.
    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Close the link permanently.
    fn close(&self);
}
