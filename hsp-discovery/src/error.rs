use chrono::{DateTime, Utc};
use hsp_primitives::{AvailabilityStatus, CapabilityId};
use thiserror::Error;

/// Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors surfaced by the capability registry.
#[derive(Debug, Error, PartialEq)]
pub enum DiscoveryError {
    /// Configuration was invalid.
    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(&'static str),
    /// No record exists for the capability.
    #[error("capability `{id}` is not known")]
    CapabilityNotFound {
        /// Requested capability.
        id: CapabilityId,
    },
    /// The record exists but has not been refreshed within the staleness window.
    #[error("capability `{id}` is stale (last seen {last_seen})")]
    StaleCapability {
        /// Requested capability.
        id: CapabilityId,
        /// Last advertisement time.
        last_seen: DateTime<Utc>,
    },
    /// The advertiser reports the capability as unavailable.
    #[error("capability `{id}` is unavailable ({status:?})")]
    CapabilityUnavailable {
        /// Requested capability.
        id: CapabilityId,
        /// Advertised availability.
        status: AvailabilityStatus,
    },
}
