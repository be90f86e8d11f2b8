//! Request/response correlation and push dispatch over a persistent socket.
//!
//! A [`Client`] turns a stream of JSON text messages into:
//! - calls whose futures settle with the correlated reply or error
//! - named consumers invoked for unsolicited pushes
//! - connectivity and error listeners
//!
//! Sends issued while the transport is down are queued and delivered in order
//! once it reopens.

pub mod client;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod events;
pub mod gate;
pub mod ids;
pub mod pending;
mod router;
pub mod token;

pub use client::{CallOptions, Client, LogFilter, PendingCall};
pub use config::{ClientConfig, ClientOptions, ConfigError};
pub use consumer::{ConsumerHandler, ConsumerRegistry};
pub use envelope::{Inbound, OutboundEnvelope, SERVICE_MSG_TYPE};
pub use error::{
    ClientError, EndpointError, ReportedError, Result, CANCELLED_ERROR, DISCONNECTED_ERROR,
};
pub use events::{ConnectionEvent, ListenerId};
pub use gate::{GateClosed, ReadinessGate};
pub use ids::{CallId, CallIdGenerator};
pub use pending::{PendingRecord, PendingTable};
pub use token::CancelToken;
