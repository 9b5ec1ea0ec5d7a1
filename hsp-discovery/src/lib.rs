//! Capability discovery for HSP peers.
//!
//! [`ServiceDiscovery`] keeps the latest advertisement per capability id and
//! answers queries filtered by name, tags and the advertiser's score in a
//! [`TrustManager`]. Records that are not refreshed within the staleness
//! window stop being returned and are eventually pruned.

#![warn(missing_docs, clippy::pedantic)]

mod discovery;
mod error;
mod trust;

/// Registry, query and configuration.
pub use discovery::{
    CapabilityQuery, CapabilityRecord, DEFAULT_PRUNE_INTERVAL, DEFAULT_STALENESS_THRESHOLD,
    DiscoveryConfig, ServiceDiscovery,
};
/// Error type and result alias.
pub use error::{DiscoveryError, DiscoveryResult};
/// Trust scores.
pub use trust::{DEFAULT_TRUST_SCORE, TrustManager};
