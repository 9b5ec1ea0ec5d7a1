//! Self-describing message format used on fallback protocols.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hsp_primitives::Priority;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of delivery retries recorded on a new message.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delivery priority of a fallback message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    /// Background traffic.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Latency sensitive.
    High,
    /// Highest priority.
    Critical,
}

impl From<Priority> for MessagePriority {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Low => Self::Low,
            Priority::Medium => Self::Normal,
            Priority::High => Self::High,
            Priority::Critical => Self::Critical,
        }
    }
}

/// Message carried by a fallback protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackMessage {
    /// Unique identifier.
    pub id: String,
    /// Originating node.
    pub sender_id: String,
    /// Destination node.
    pub recipient_id: String,
    /// Application message type (for HSP traffic, the envelope's wire type).
    pub message_type: String,
    /// Message body.
    pub payload: Value,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Delivery priority.
    #[serde(default)]
    pub priority: MessagePriority,
    /// Correlation with an earlier message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Delivery attempts already made.
    #[serde(default)]
    pub retry_count: u32,
    /// Maximum delivery attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds after `timestamp` when the message expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl FallbackMessage {
    /// Creates a message stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: Value,
        priority: MessagePriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now(),
            priority,
            correlation_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            ttl_secs: None,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the time to live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    /// Returns `true` when the message outlived its TTL at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl_secs else {
            return false;
        };
        let age = now.signed_duration_since(self.timestamp);
        age.num_seconds() > i64::try_from(ttl).unwrap_or(i64::MAX)
    }

    /// Returns `true` when the message outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
