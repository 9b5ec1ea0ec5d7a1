//! Strongly typed configuration schema. Every field has a default so a
//! partial JSON document is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Root configuration of one HSP peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HspConfig {
    /// Identity of this peer, e.g. `did:hsp:alpha`.
    pub ai_id: String,
    /// Broker endpoint used by network transports.
    pub broker: BrokerConfig,
    /// Reliable publish tuning.
    pub connector: ConnectorSection,
    /// Fallback protocols.
    pub fallback: FallbackSection,
    /// Capability discovery and trust.
    pub discovery: DiscoverySection,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for HspConfig {
    fn default() -> Self {
        Self {
            ai_id: "did:hsp:local".to_owned(),
            broker: BrokerConfig::default(),
            connector: ConnectorSection::default(),
            fallback: FallbackSection::default(),
            discovery: DiscoverySection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HspConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Fails on an empty `ai_id`, zero timeouts or intervals, and trust
    /// scores outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.ai_id.trim().is_empty() {
            bail!("ai_id cannot be empty");
        }
        if self.broker.address.trim().is_empty() {
            bail!("broker.address cannot be empty");
        }
        self.connector.validate()?;
        self.fallback.validate()?;
        self.discovery.validate()?;
        Ok(())
    }
}

/// Broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Host name or address.
    pub address: String,
    /// TCP port.
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_owned(),
            port: 1883,
        }
    }
}

/// Connector tuning, in wire-friendly units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSection {
    /// Seconds to wait for each acknowledgement.
    pub ack_timeout_secs: u64,
    /// Re-publishes after the first attempt.
    pub max_ack_retries: u32,
    /// Transport connect attempts.
    pub connect_attempts: u32,
    /// Initial connect backoff in milliseconds.
    pub connect_backoff_ms: u64,
    /// Transport QoS level.
    pub default_qos: u8,
    /// Overall acknowledgement deadline for task requests, in seconds.
    pub task_request_deadline_secs: Option<u64>,
    /// Inbound dispatch concurrency.
    pub max_dispatch_concurrency: usize,
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self {
            ack_timeout_secs: 10,
            max_ack_retries: 3,
            connect_attempts: 3,
            connect_backoff_ms: 1_000,
            default_qos: 1,
            task_request_deadline_secs: None,
            max_dispatch_concurrency: 32,
        }
    }
}

impl ConnectorSection {
    /// Acknowledgement timeout.
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Initial connect backoff.
    #[must_use]
    pub const fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Task request deadline.
    #[must_use]
    pub fn task_request_deadline(&self) -> Option<Duration> {
        self.task_request_deadline_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.ack_timeout_secs == 0 {
            bail!("connector.ack_timeout_secs must be greater than zero");
        }
        if self.connect_attempts == 0 {
            bail!("connector.connect_attempts must be at least one");
        }
        if self.default_qos > 2 {
            bail!("connector.default_qos must be 0, 1 or 2");
        }
        if self.task_request_deadline_secs == Some(0) {
            bail!("connector.task_request_deadline_secs must be greater than zero");
        }
        if self.max_dispatch_concurrency == 0 {
            bail!("connector.max_dispatch_concurrency must be at least one");
        }
        Ok(())
    }
}

/// Fallback protocols and the manager's health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    /// Enables fallback delivery.
    pub enabled: bool,
    /// Seconds between health checks.
    pub health_check_interval_secs: u64,
    /// In-process queue protocol.
    pub in_memory: InMemorySection,
    /// Directory-drop protocol.
    pub file: FileSection,
    /// HTTP protocol.
    pub http: HttpSection,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval_secs: 30,
            in_memory: InMemorySection::default(),
            file: FileSection::default(),
            http: HttpSection::default(),
        }
    }
}

impl FallbackSection {
    /// Health check interval.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.health_check_interval_secs == 0 {
            bail!("fallback.health_check_interval_secs must be greater than zero");
        }
        if self.file.enabled && self.file.poll_interval_ms == 0 {
            bail!("fallback.file.poll_interval_ms must be greater than zero");
        }
        if self.http.enabled && self.http.request_timeout_secs == 0 {
            bail!("fallback.http.request_timeout_secs must be greater than zero");
        }
        if self.http.enabled && self.http.max_body_bytes == 0 {
            bail!("fallback.http.max_body_bytes must be greater than zero");
        }
        Ok(())
    }
}

/// In-process queue protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemorySection {
    /// Adds the protocol.
    pub enabled: bool,
    /// Preference; higher wins.
    pub priority: i32,
}

impl Default for InMemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 1,
        }
    }
}

/// Directory-drop protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSection {
    /// Adds the protocol.
    pub enabled: bool,
    /// Preference; higher wins.
    pub priority: i32,
    /// Directory holding `inbox/` and `outbox/`.
    pub base_path: PathBuf,
    /// Overrides `<base_path>/inbox`.
    pub inbox: Option<PathBuf>,
    /// Overrides `<base_path>/outbox`.
    pub outbox: Option<PathBuf>,
    /// Inbox poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for FileSection {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 2,
            base_path: std::env::temp_dir().join("hsp_fallback"),
            inbox: None,
            outbox: None,
            poll_interval_ms: 500,
        }
    }
}

impl FileSection {
    /// Inbox poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// HTTP protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Adds the protocol.
    pub enabled: bool,
    /// Preference; higher wins.
    pub priority: i32,
    /// Listen host.
    pub host: String,
    /// Listen port; 0 picks a free one.
    pub port: u16,
    /// Outgoing request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Largest accepted inbound message body in bytes.
    pub max_body_bytes: usize,
    /// Known peer nodes and their base URLs.
    pub endpoints: Vec<PeerEndpoint>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 3,
            host: "127.0.0.1".to_owned(),
            port: 8765,
            request_timeout_secs: 10,
            max_body_bytes: 1024 * 1024,
            endpoints: Vec::new(),
        }
    }
}

impl HttpSection {
    /// Outgoing request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Base URL of a peer reachable over the HTTP protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    /// Peer node id (the fallback message recipient).
    pub node_id: String,
    /// Base URL, `http://` or `https://`.
    pub url: String,
}

/// Capability discovery and trust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Seconds after which an unrefreshed capability is stale.
    pub staleness_threshold_secs: u64,
    /// Seconds between pruning passes.
    pub prune_interval_secs: u64,
    /// Trust score of peers without an explicit score.
    pub default_trust_score: f64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 24 * 60 * 60,
            prune_interval_secs: 10 * 60,
            default_trust_score: 0.5,
        }
    }
}

impl DiscoverySection {
    /// Staleness threshold.
    #[must_use]
    pub const fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    /// Pruning interval.
    #[must_use]
    pub const fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.staleness_threshold_secs == 0 {
            bail!("discovery.staleness_threshold_secs must be greater than zero");
        }
        if self.prune_interval_secs == 0 {
            bail!("discovery.prune_interval_secs must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.default_trust_score) {
            bail!("discovery.default_trust_score must be within [0, 1]");
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Single line per event.
    #[default]
    Compact,
    /// Multi-line, human oriented.
    Pretty,
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info,hsp_connector=debug`.
    pub directive: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: "info".to_owned(),
            format: LogFormat::Compact,
        }
    }
}
