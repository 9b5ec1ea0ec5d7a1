//! Validation of inbound bytes before they reach the internal bus.

use std::sync::atomic::{AtomicU64, Ordering};

use hsp_primitives::{Error as CodecError, MessageEnvelope, MessageType};
use serde_json::Value;
use tracing::debug;

use crate::AlignmentError;

const REQUIRED_FIELDS: [&str; 4] = ["message_id", "sender_ai_id", "message_type", "payload"];

/// Counters kept by a [`DataAligner`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentStats {
    /// Messages turned into envelopes.
    pub accepted: u64,
    /// Messages rejected.
    pub rejected: u64,
}

/// Turns raw transport bytes into validated envelopes.
#[derive(Debug, Default)]
pub struct DataAligner {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl DataAligner {
    /// Creates an aligner with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and decodes `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an [`AlignmentError`] describing the first problem found.
    pub fn align(&self, bytes: &[u8]) -> Result<MessageEnvelope, AlignmentError> {
        let outcome = Self::check(bytes);
        match &outcome {
            Ok(envelope) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_id = %envelope.message_id,
                    message_type = %envelope.message_type(),
                    "envelope aligned"
                );
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> AlignmentStats {
        AlignmentStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn check(bytes: &[u8]) -> Result<MessageEnvelope, AlignmentError> {
        let text = std::str::from_utf8(bytes).map_err(|_| AlignmentError::NotUtf8)?;
        let value: Value =
            serde_json::from_str(text).map_err(|err| AlignmentError::InvalidJson {
                reason: err.to_string(),
            })?;
        let Value::Object(fields) = &value else {
            return Err(AlignmentError::NotAnObject);
        };

        for field in REQUIRED_FIELDS {
            if fields.get(field).is_none_or(Value::is_null) {
                return Err(AlignmentError::MissingField(field));
            }
        }

        let message_type = fields
            .get("message_type")
            .and_then(Value::as_str)
            .ok_or(AlignmentError::MissingField("message_type"))?;
        if message_type.parse::<MessageType>().is_err() {
            return Err(AlignmentError::UnknownMessageType(message_type.to_owned()));
        }

        MessageEnvelope::from_value(value).map_err(|err| match err {
            CodecError::UnknownMessageType(ty) => AlignmentError::UnknownMessageType(ty),
            other => AlignmentError::Invalid(other),
        })
    }
}
