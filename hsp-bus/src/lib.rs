//! Transport seam, in-process broker, internal bus and message bridge.

#![warn(missing_docs, clippy::pedantic)]

mod aligner;
mod bridge;
mod broker;
mod error;
mod internal;
mod transport;

/// Inbound byte validation.
pub use aligner::{AlignmentStats, DataAligner};
/// Transport to bus adapter.
pub use bridge::{BusMessage, MessageBridge, OUTBOUND_CHANNEL, OutboundMessage, inbound_channel};
/// Reference in-process transport.
pub use broker::{BrokerTransport, MemoryBroker};
/// Error types and result aliases.
pub use error::{AlignmentError, BusError, BusResult, TransportError, TransportResult};
/// In-process fan-out.
pub use internal::{BusHandler, InternalBus, SubscriptionId};
/// Transport collaborator interface.
pub use transport::{MessageHandler, Transport};
