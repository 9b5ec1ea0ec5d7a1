//! HSP multi-agent messaging facade.
//!
//! Bundles the workspace crates behind feature flags. With the default
//! `context` feature, [`HspContext`] assembles a complete peer from an
//! [`HspConfig`](config::HspConfig) and a transport.

#![warn(missing_docs, clippy::pedantic)]

/// Identifiers, payloads, envelope codec and topics.
pub use hsp_primitives as primitives;

/// Transport seam, internal bus and message bridge.
pub use hsp_bus as bus;

/// Fallback protocols and manager (enabled by `fallback` feature).
#[cfg(feature = "fallback")]
pub use hsp_fallback as fallback;

/// Trust scores and capability discovery (enabled by `discovery` feature).
#[cfg(feature = "discovery")]
pub use hsp_discovery as discovery;

/// Connector facade (enabled by `connector` feature).
#[cfg(feature = "connector")]
pub use hsp_connector as connector;

/// Configuration schema (enabled by `config` feature).
#[cfg(feature = "config")]
pub use hsp_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use hsp_telemetry as telemetry;

#[cfg(feature = "context")]
mod context;

#[cfg(feature = "context")]
pub use context::{ContextError, ContextResult, HspContext};
