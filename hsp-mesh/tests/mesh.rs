//! Two peers sharing an in-process broker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hsp_mesh::HspContext;
use hsp_mesh::bus::MemoryBroker;
use hsp_mesh::config::HspConfig;
use hsp_mesh::connector::ConnectionState;
use hsp_mesh::discovery::CapabilityQuery;
use hsp_mesh::primitives::{
    CapabilityAdvertisement, CapabilityId, FactPayload, PeerId, TaskRequestPayload,
    TaskResultPayload, TaskStatus,
};
use serde_json::{Map, json};
use tokio::sync::mpsc;
use uuid::Uuid;

const ALPHA: &str = "did:hsp:alpha";
const BETA: &str = "did:hsp:beta";

struct FileLink {
    root: PathBuf,
}

impl FileLink {
    fn new() -> Self {
        Self {
            root: std::env::temp_dir().join(format!("hsp-mesh-{}", Uuid::new_v4())),
        }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Drop for FileLink {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn config(ai_id: &str) -> HspConfig {
    let mut config = HspConfig {
        ai_id: ai_id.to_owned(),
        ..HspConfig::default()
    };
    config.connector.ack_timeout_secs = 1;
    config.connector.connect_attempts = 1;
    config.connector.connect_backoff_ms = 1;
    config.fallback.file.enabled = false;
    config
}

fn file_config(ai_id: &str, base: &Path, inbox: PathBuf, outbox: PathBuf) -> HspConfig {
    let mut config = config(ai_id);
    config.fallback.in_memory.enabled = false;
    config.fallback.file.enabled = true;
    config.fallback.file.base_path = base.to_path_buf();
    config.fallback.file.inbox = Some(inbox);
    config.fallback.file.outbox = Some(outbox);
    config.fallback.file.poll_interval_ms = 20;
    config
}

fn peer(id: &str) -> PeerId {
    PeerId::new(id).unwrap()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn advertisements_populate_remote_discovery() {
    let broker = MemoryBroker::new();
    let alpha = HspContext::from_config(&config(ALPHA), Arc::new(broker.transport())).unwrap();
    let beta = HspContext::from_config(&config(BETA), Arc::new(broker.transport())).unwrap();
    assert!(alpha.start().await);
    assert!(beta.start().await);

    let advertisement = CapabilityAdvertisement::builder(
        CapabilityId::new("translate_v1").unwrap(),
        peer(BETA),
    )
    .name("Translator")
    .and_then(|builder| builder.version("1.0"))
    .map(|builder| builder.tag("nlp"))
    .and_then(|builder| builder.build())
    .unwrap();
    assert!(beta.connector().advertise_capability(advertisement).await);

    let discovery = Arc::clone(alpha.discovery());
    eventually(|| !discovery.is_empty()).await;

    let found = alpha
        .discovery()
        .find_capabilities(&CapabilityQuery::new().tag("nlp"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].advertiser_id, peer(BETA));
    assert!(beta.discovery().is_empty());

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test]
async fn task_request_is_acknowledged_and_answered() {
    let broker = MemoryBroker::new();
    let alpha = HspContext::from_config(&config(ALPHA), Arc::new(broker.transport())).unwrap();
    let beta = HspContext::from_config(&config(BETA), Arc::new(broker.transport())).unwrap();

    let responder = beta.connector().clone();
    beta.connector()
        .register_task_request_callback(move |request, sender, envelope| {
            let responder = responder.clone();
            async move {
                let result = TaskResultPayload::success(
                    request.request_id,
                    peer(BETA),
                    json!({ "echo": request.parameters }),
                );
                responder
                    .send_task_result(result, sender.as_str(), envelope.ack_key())
                    .await;
                Ok(())
            }
        });

    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    alpha
        .connector()
        .register_task_result_callback(move |result, _, envelope| {
            let results_tx = results_tx.clone();
            async move {
                let _ = results_tx.send((result, envelope.correlation_id.clone()));
                Ok(())
            }
        });

    alpha.start().await;
    beta.start().await;

    let mut parameters = Map::new();
    parameters.insert("text".to_owned(), json!("hola"));
    let correlation_id = alpha
        .connector()
        .send_task_request(TaskRequestPayload::new(peer(ALPHA), parameters), BETA)
        .await
        .expect("request acknowledged");
    assert_eq!(alpha.connector().pending_ack_count(), 0);

    let (result, correlation) = tokio::time::timeout(Duration::from_secs(2), results_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(correlation.as_deref(), Some(correlation_id.as_str()));
    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.payload, Some(json!({ "echo": { "text": "hola" } })));

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test]
async fn broker_outage_is_bridged_by_file_fallback() {
    let link = FileLink::new();
    let broker = MemoryBroker::new();
    let alpha = HspContext::from_config(
        &file_config(ALPHA, &link.dir("alpha"), link.dir("to_alpha"), link.dir("to_beta")),
        Arc::new(broker.transport()),
    )
    .unwrap();
    let beta = HspContext::from_config(
        &file_config(BETA, &link.dir("beta"), link.dir("to_beta"), link.dir("to_alpha")),
        Arc::new(broker.transport()),
    )
    .unwrap();

    let (facts_tx, mut facts_rx) = mpsc::unbounded_channel();
    beta.connector().register_fact_callback(move |fact, sender, _| {
        let facts_tx = facts_tx.clone();
        async move {
            let _ = facts_tx.send((fact.statement_nl, sender));
            Ok(())
        }
    });

    assert!(alpha.start().await);
    assert!(beta.start().await);

    broker.set_available(false);
    let fact = FactPayload::natural_language(peer(ALPHA), "broker is down", 0.8);
    assert!(alpha.connector().publish_fact(fact, None).await);
    assert_eq!(alpha.connector().state(), ConnectionState::Degraded);
    assert!(!alpha.connector().communication_status().hsp_available);

    let (statement, sender) = tokio::time::timeout(Duration::from_secs(2), facts_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(statement.as_deref(), Some("broker is down"));
    assert_eq!(sender, peer(ALPHA));

    broker.set_available(true);
    let fact = FactPayload::natural_language(peer(ALPHA), "broker is back", 0.9);
    assert!(alpha.connector().publish_fact(fact, None).await);
    assert_eq!(alpha.connector().state(), ConnectionState::Connected);

    let (statement, _) = tokio::time::timeout(Duration::from_secs(2), facts_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(statement.as_deref(), Some("broker is back"));

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test]
async fn unreachable_broker_still_starts_fallback() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let alpha = HspContext::from_config(&config(ALPHA), Arc::new(broker.transport())).unwrap();

    assert!(!alpha.start().await);
    let status = alpha.connector().communication_status();
    assert!(!status.hsp_available);
    assert!(status.fallback_initialized);
    assert_eq!(status.state, ConnectionState::Degraded);

    let health = alpha.connector().health_check().await;
    assert!(!health.hsp_healthy);
    assert!(health.overall_healthy);
    assert!(alpha.discovery().is_pruning());

    alpha.shutdown().await;
    assert_eq!(alpha.connector().state(), ConnectionState::Closed);
    assert!(!alpha.discovery().is_pruning());
}
