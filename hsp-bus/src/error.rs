//! Error types for the transport seam, the aligner and the bridge.

use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Operation requires an established connection.
    #[error("transport is not connected")]
    NotConnected,
    /// Connection could not be established.
    #[error("transport connect failed: {reason}")]
    ConnectFailed {
        /// Human-readable context.
        reason: String,
    },
    /// Message could not be published.
    #[error("publish to `{topic}` failed: {reason}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Human-readable context.
        reason: String,
    },
    /// Subscription could not be installed.
    #[error("subscribe to `{topic}` failed: {reason}")]
    SubscribeFailed {
        /// Subscription filter.
        topic: String,
        /// Human-readable context.
        reason: String,
    },
}

impl TransportError {
    /// Convenience constructor for connect failures.
    #[must_use]
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for publish failures.
    #[must_use]
    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Reasons the data aligner rejects inbound bytes.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// Bytes were not valid UTF-8.
    #[error("message is not valid UTF-8")]
    NotUtf8,
    /// Bytes were not a JSON document.
    #[error("message is not valid JSON: {reason}")]
    InvalidJson {
        /// Parser error.
        reason: String,
    },
    /// Top-level JSON value was not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,
    /// A required envelope field was absent or null.
    #[error("envelope is missing required field `{0}`")]
    MissingField(&'static str),
    /// Envelope carried an unsupported message type.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
    /// Envelope failed typed decoding.
    #[error("envelope rejected: {0}")]
    Invalid(#[source] hsp_primitives::Error),
}

/// Errors surfaced by the message bridge.
#[derive(Debug, Error)]
pub enum BusError {
    /// Underlying transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Envelope could not be encoded.
    #[error(transparent)]
    Codec(#[from] hsp_primitives::Error),
}

/// Result alias for bridge operations.
pub type BusResult<T> = Result<T, BusError>;
