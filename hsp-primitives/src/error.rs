//! Shared error definitions for HSP primitives.

use thiserror::Error;

/// Result alias used throughout the HSP crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating HSP primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// Peer identifier failed validation.
    #[error("invalid peer id `{id}`: {reason}")]
    InvalidPeerId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Capability identifier failed validation.
    #[error("invalid capability id `{id}`: {reason}")]
    InvalidCapabilityId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// The envelope `message_type` is not one this implementation understands.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    /// Envelope bytes could not be encoded or decoded.
    #[error("envelope codec error: {reason}")]
    Codec {
        /// Human-readable reason describing the failure.
        reason: String,
    },
}

impl Error {
    /// Convenience constructor for codec failures.
    #[must_use]
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::codec(value.to_string())
    }
}
