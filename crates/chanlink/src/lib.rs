//! Call/reply correlation and push dispatch over a reconnecting socket.
//!
//! # Crate Structure
//!
//! - [`transport`]: link abstraction with TCP, Unix socket, WebSocket and in-memory implementations
//! - [`client`]: the correlation engine (calls, cancellation, consumers, listeners)

/// Re-export transport types.
pub mod transport {
    pub use chanlink_transport::*;
}

/// Re-export client types.
pub mod client {
    pub use chanlink_client::*;
}

pub use chanlink_client::{CallOptions, CancelToken, Client, ClientConfig, ClientError};
