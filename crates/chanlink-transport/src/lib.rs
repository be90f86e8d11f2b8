//! Persistent text transports for chanlink.
//!
//! Provides the narrow interface the correlation engine relies on:
//! - [`Transport`]: send, readiness, and an ordered opened/closed/message event stream
//! - [`StreamTransport`]: text over TCP or Unix sockets (newline-framed) or WebSocket, with reconnect/backoff
//! - [`MemoryTransport`]: an in-process link driven by a [`MemoryRemote`]
//!
//! Reconnection policy lives here and only here.

pub mod addr;
pub mod codec;
pub mod error;
mod link;
pub mod memory;
pub mod stream;
pub mod traits;

pub use addr::EndpointAddr;
pub use codec::{check_len, LineCodec, DEFAULT_MAX_FRAME_LEN};
pub use error::{Result, TransportError};
pub use memory::{MemoryRemote, MemoryTransport};
pub use stream::{StreamConfig, StreamTransport};
pub use traits::{LinkState, Transport, TransportEvent};
