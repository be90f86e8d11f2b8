/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link is not currently open; the message was not accepted.
    #[error("transport not ready")]
    NotReady,

    /// The transport has been shut down and will not reopen.
    #[error("transport shut down")]
    Shutdown,

    /// The inbound event stream was already handed to another consumer.
    #[error("transport events already taken")]
    EventsTaken,

    /// The endpoint URL could not be understood.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Failed to connect to the remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A text frame exceeds the configured maximum length.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A received frame is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// An outbound text contains a raw newline and cannot be framed.
    #[error("outbound text contains an embedded newline")]
    EmbeddedNewline,

    /// WebSocket handshake or protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    /// True for errors that refuse one outbound message but leave the link usable.
    pub fn is_message_rejected(&self) -> bool {
        matches!(
            self,
            TransportError::FrameTooLarge { .. } | TransportError::EmbeddedNewline
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
