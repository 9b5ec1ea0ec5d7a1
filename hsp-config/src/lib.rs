//! Configuration for HSP peers: a JSON schema with defaults for every field
//! and `HSP_*` environment overrides.

#![warn(missing_docs, clippy::pedantic)]

mod loader;
mod schema;

pub use loader::ENV_KEYS;
pub use schema::{
    BrokerConfig, ConnectorSection, DiscoverySection, FallbackSection, FileSection, HspConfig,
    HttpSection, InMemorySection, LogFormat, LoggingConfig, PeerEndpoint,
};
