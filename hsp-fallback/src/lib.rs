//! Alternate transports used when the primary HSP transport is unavailable.
//!
//! A [`FallbackManager`] holds several [`FallbackProtocol`]s ordered by
//! priority, keeps the healthiest one active, and fails over between them
//! when a send is rejected.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod file;
mod http;
mod http_client;
mod manager;
mod memory;
mod message;
mod protocol;

/// Error type and result alias.
pub use error::{FallbackError, FallbackResult};
/// Directory-drop protocol.
pub use file::{DEFAULT_POLL_INTERVAL, FileProtocol};
/// HTTP protocol.
pub use http::{DEFAULT_REQUEST_TIMEOUT, HttpProtocol};
/// Protocol manager.
pub use manager::{
    DEFAULT_HEALTH_CHECK_INTERVAL, FallbackConfig, FallbackManager, FallbackStatus, ProtocolReport,
};
/// Same-process protocol.
pub use memory::InMemoryProtocol;
/// Message format.
pub use message::{DEFAULT_MAX_RETRIES, FallbackMessage, MessagePriority};
/// Protocol seam.
pub use protocol::{
    ANY_MESSAGE_TYPE, FallbackHandler, FallbackProtocol, ProtocolStats, ProtocolStatus,
};
