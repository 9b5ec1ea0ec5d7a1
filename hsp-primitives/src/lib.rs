//! Core shared types for HSP peers: identifiers, payloads and the envelope codec.

#![warn(missing_docs, clippy::pedantic)]

mod capability;
mod envelope;
mod error;
mod ids;
mod payload;
pub mod timestamp;
pub mod topics;

/// Capability identifiers and advertisements.
pub use capability::{
    AvailabilityStatus, CapabilityAdvertisement, CapabilityAdvertisementBuilder, CapabilityId,
};
/// Envelope, payload union and codec.
pub use envelope::{
    BROADCAST_RECIPIENT, CommunicationPattern, ENVELOPE_VERSION, MessageEnvelope, MessageType,
    PROTOCOL_VERSION, Payload, Priority, QosParameters,
};
/// Error type and result alias shared across the HSP crates.
pub use error::{Error, Result};
/// Peer identifiers and message id generation.
pub use ids::{PeerId, new_message_id};
/// Typed payloads.
pub use payload::{
    AckStatus, AcknowledgementPayload, ErrorDetails, FactPayload, StatementType,
    TaskRequestPayload, TaskResultPayload, TaskStatus,
};
