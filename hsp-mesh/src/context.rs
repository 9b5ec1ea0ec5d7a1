//! Application-lifetime object graph of one peer.

use std::num::NonZeroUsize;
use std::sync::Arc;

use hsp_bus::Transport;
use hsp_config::{FallbackSection, HspConfig};
use hsp_connector::{
    ConnectorConfig, ConnectorError, HspConnector, SchedulerConfig, TaskScheduler,
};
use hsp_discovery::{DiscoveryConfig, DiscoveryError, ServiceDiscovery, TrustManager};
use hsp_fallback::{
    FallbackConfig, FallbackError, FallbackManager, FileProtocol, HttpProtocol, InMemoryProtocol,
};
use hsp_primitives::PeerId;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while assembling a context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The configured `ai_id` is not a valid peer id.
    #[error("invalid peer id: {0}")]
    Identity(#[from] hsp_primitives::Error),
    /// Fallback manager could not be created.
    #[error(transparent)]
    Fallback(#[from] FallbackError),
    /// Discovery could not be created.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// Connector could not be created.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Result alias for context assembly.
pub type ContextResult<T> = Result<T, ContextError>;

/// Trust manager, discovery, fallback manager and connector of one peer,
/// wired together.
///
/// Inbound capability advertisements are recorded in discovery. Nothing is
/// global: create one context per peer.
#[derive(Debug)]
pub struct HspContext {
    config: HspConfig,
    trust: Arc<TrustManager>,
    discovery: Arc<ServiceDiscovery>,
    fallback: Option<Arc<FallbackManager>>,
    connector: HspConnector,
}

impl HspContext {
    /// Builds every component from `config` without starting anything.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when the configuration or the peer id is
    /// invalid.
    pub fn from_config(config: &HspConfig, transport: Arc<dyn Transport>) -> ContextResult<Self> {
        config
            .validate()
            .map_err(|err| ContextError::InvalidConfig(format!("{err:#}")))?;
        let ai_id = PeerId::new(config.ai_id.clone())?;

        let trust = Arc::new(TrustManager::new(config.discovery.default_trust_score));
        let discovery = Arc::new(ServiceDiscovery::new(
            DiscoveryConfig::new(
                config.discovery.staleness_threshold(),
                config.discovery.prune_interval(),
            ),
            Arc::clone(&trust),
        )?);

        let fallback = if config.fallback.enabled {
            Some(Arc::new(build_fallback(&config.fallback, &ai_id)?))
        } else {
            None
        };

        let section = &config.connector;
        let connector_config = ConnectorConfig::default()
            .with_ack_timeout(section.ack_timeout())
            .with_max_ack_retries(section.max_ack_retries)
            .with_connect_retry(section.connect_attempts, section.connect_backoff())
            .with_fallback(config.fallback.enabled)
            .with_default_qos(section.default_qos)
            .with_task_request_deadline(section.task_request_deadline());
        let concurrency = NonZeroUsize::new(section.max_dispatch_concurrency).ok_or_else(|| {
            ContextError::InvalidConfig("dispatch concurrency must be at least one".to_owned())
        })?;

        let mut builder = HspConnector::builder(ai_id, transport)
            .config(connector_config)
            .scheduler(TaskScheduler::new(SchedulerConfig::new(concurrency)));
        if let Some(fallback) = &fallback {
            builder = builder.fallback(Arc::clone(fallback));
        }
        let connector = builder.build()?;

        let registry = Arc::clone(&discovery);
        connector.register_capability_advertisement_callback(move |payload, sender, envelope| {
            let capability = payload.capability_id.clone();
            let recorded = registry.process_capability_advertisement(payload, &sender, &envelope);
            debug!(%capability, %sender, recorded, "capability advertisement processed");
            async { Ok(()) }
        });

        Ok(Self {
            config: config.clone(),
            trust,
            discovery,
            fallback,
            connector,
        })
    }

    /// Connects the connector and starts discovery pruning.
    ///
    /// Returns whether the primary transport connected.
    pub async fn start(&self) -> bool {
        let connected = self.connector.connect().await;
        self.discovery.start_pruning();
        info!(ai_id = %self.connector.ai_id(), connected, "hsp context started");
        connected
    }

    /// Shuts the connector down and stops pruning.
    pub async fn shutdown(&self) {
        self.connector.shutdown().await;
        self.discovery.stop().await;
        info!(ai_id = %self.connector.ai_id(), "hsp context stopped");
    }

    /// Configuration the context was built from.
    #[must_use]
    pub fn config(&self) -> &HspConfig {
        &self.config
    }

    /// Peer trust scores.
    #[must_use]
    pub fn trust(&self) -> &Arc<TrustManager> {
        &self.trust
    }

    /// Capability registry.
    #[must_use]
    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    /// Fallback manager, when fallback is enabled.
    #[must_use]
    pub fn fallback(&self) -> Option<&Arc<FallbackManager>> {
        self.fallback.as_ref()
    }

    /// Connector.
    #[must_use]
    pub fn connector(&self) -> &HspConnector {
        &self.connector
    }
}

fn build_fallback(section: &FallbackSection, ai_id: &PeerId) -> ContextResult<FallbackManager> {
    let manager = FallbackManager::new(FallbackConfig::new(
        section.health_check_interval(),
        ai_id.as_str(),
    ))?;

    if section.in_memory.enabled {
        manager.add_protocol(Arc::new(InMemoryProtocol::new()), section.in_memory.priority);
    }

    let file = &section.file;
    if file.enabled {
        let mut protocol = FileProtocol::new(&file.base_path).with_poll_interval(file.poll_interval());
        if let Some(inbox) = &file.inbox {
            protocol = protocol.with_inbox(inbox.clone());
        }
        if let Some(outbox) = &file.outbox {
            protocol = protocol.with_outbox(outbox.clone());
        }
        manager.add_protocol(Arc::new(protocol), file.priority);
    }

    let http = &section.http;
    if http.enabled {
        let protocol = HttpProtocol::new(http.host.clone(), http.port)
            .with_request_timeout(http.request_timeout())
            .with_max_body_bytes(http.max_body_bytes);
        for peer in &http.endpoints {
            protocol.add_endpoint(peer.node_id.clone(), peer.url.clone());
        }
        manager.add_protocol(Arc::new(protocol), http.priority);
    }

    Ok(manager)
}

#[cfg(test)]
mod tests {
    use hsp_bus::MemoryBroker;

    use super::*;

    fn offline_config(ai_id: &str) -> HspConfig {
        let mut config = HspConfig {
            ai_id: ai_id.to_owned(),
            ..HspConfig::default()
        };
        config.fallback.file.enabled = false;
        config
    }

    #[test]
    fn rejects_invalid_identity() {
        let broker = MemoryBroker::new();
        let config = offline_config("not a did");
        let err = HspContext::from_config(&config, Arc::new(broker.transport())).unwrap_err();
        assert!(matches!(err, ContextError::Identity(_)));
    }

    #[test]
    fn builds_configured_protocols() {
        let broker = MemoryBroker::new();
        let context =
            HspContext::from_config(&offline_config("did:hsp:alpha"), Arc::new(broker.transport()))
                .unwrap();

        let status = context.fallback().unwrap().status();
        let names: Vec<_> = status.protocols.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["in_memory"]);
        assert_eq!(context.connector().ai_id().as_str(), "did:hsp:alpha");
        assert!((context.trust().default_score() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn fallback_can_be_disabled() {
        let broker = MemoryBroker::new();
        let mut config = offline_config("did:hsp:alpha");
        config.fallback.enabled = false;
        let context = HspContext::from_config(&config, Arc::new(broker.transport())).unwrap();
        assert!(context.fallback().is_none());
        assert!(!context.connector().config().fallback_enabled());
    }
}
