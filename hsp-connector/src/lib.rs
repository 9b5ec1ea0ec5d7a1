//! HSP connector: the peer-facing facade over a transport.
//!
//! The connector publishes envelopes with acknowledgement tracking and
//! bounded retries, hands undeliverable traffic to a fallback manager, and
//! dispatches inbound envelopes to typed callbacks on a bounded scheduler.

#![warn(missing_docs, clippy::pedantic)]

mod ack;
mod config;
mod connector;
mod dispatch;
mod error;
mod lifecycle;
mod scheduler;
mod status;

/// Connector tuning.
pub use config::{
    ConnectorConfig, DEFAULT_ACK_TIMEOUT, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF,
    DEFAULT_MAX_ACK_RETRIES,
};
/// The connector facade.
pub use connector::{CapabilityProvider, FALLBACK_TOPIC, HspConnector, HspConnectorBuilder};
/// Callback types.
pub use dispatch::{Callback, CallbackError, CallbackResult, LifecycleCallback};
/// Error type and result alias.
pub use error::{ConnectorError, ConnectorResult};
/// Connection state machine.
pub use lifecycle::{
    ConnectionEvent, ConnectionState, Lifecycle, LifecycleError, LifecycleResult,
};
/// Bounded task scheduler used for inbound dispatch.
pub use scheduler::{SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler};
/// Delivery and health reports.
pub use status::{CommunicationStatus, Delivery, HealthReport};
