//! Directory-drop protocol for cross-process delivery.
//!
//! Outgoing messages are written to the outbox as `<id>_<node>.json`; the inbox
//! is polled and every delivered file is deleted. Point a peer's inbox at this
//! node's outbox (and vice versa) to connect two processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::ProtocolCore;
use crate::{
    FallbackError, FallbackHandler, FallbackMessage, FallbackProtocol, FallbackResult,
    ProtocolStats, ProtocolStatus,
};

/// Default inbox polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// File based fallback protocol.
#[derive(Debug)]
pub struct FileProtocol {
    core: Arc<ProtocolCore>,
    inbox: PathBuf,
    outbox: PathBuf,
    node_id: String,
    poll_interval: Duration,
}

impl FileProtocol {
    /// Creates a protocol using `<base>/inbox` and `<base>/outbox`.
    #[must_use]
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let mut node_id = Uuid::new_v4().simple().to_string();
        node_id.truncate(8);
        Self {
            core: ProtocolCore::new("file_based"),
            inbox: base.join("inbox"),
            outbox: base.join("outbox"),
            node_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the inbox directory.
    #[must_use]
    pub fn with_inbox(mut self, inbox: impl Into<PathBuf>) -> Self {
        self.inbox = inbox.into();
        self
    }

    /// Overrides the outbox directory.
    #[must_use]
    pub fn with_outbox(mut self, outbox: impl Into<PathBuf>) -> Self {
        self.outbox = outbox.into();
        self
    }

    /// Overrides the polling interval. A zero interval fails `initialize`.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Directory polled for incoming messages.
    #[must_use]
    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// Directory outgoing messages are written to.
    #[must_use]
    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    /// Short identifier of this node, embedded in file names.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

async fn drain_inbox(core: &ProtocolCore, inbox: &Path) -> FallbackResult<usize> {
    let mut entries = fs::read_dir(inbox)
        .await
        .map_err(|err| FallbackError::io(inbox, err))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| FallbackError::io(inbox, err))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let mut delivered = 0;
    for path in files {
        let parsed = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<FallbackMessage>(&bytes),
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read fallback message");
                core.record_error();
                continue;
            }
        };
        if let Err(err) = fs::remove_file(&path).await {
            warn!(path = %path.display(), %err, "failed to remove fallback message");
        }
        match parsed {
            Ok(message) => {
                core.deliver(message);
                delivered += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding malformed fallback message");
                core.record_error();
            }
        }
    }
    Ok(delivered)
}

#[async_trait]
impl FallbackProtocol for FileProtocol {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn initialize(&self) -> FallbackResult<()> {
        if self.poll_interval.is_zero() {
            self.core.set_status(ProtocolStatus::Failed);
            return Err(FallbackError::InvalidConfig(
                "poll interval must be greater than zero",
            ));
        }
        for dir in [&self.inbox, &self.outbox] {
            if let Err(err) = fs::create_dir_all(dir).await {
                self.core.set_status(ProtocolStatus::Failed);
                return Err(FallbackError::io(dir.clone(), err));
            }
        }
        self.core.set_status(ProtocolStatus::Active);
        info!(
            protocol = self.core.name(),
            node_id = %self.node_id,
            inbox = %self.inbox.display(),
            "fallback protocol initialized"
        );
        Ok(())
    }

    async fn start(&self) -> FallbackResult<()> {
        self.core.ensure_active()?;
        if !self.core.begin_listening() {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let inbox = self.inbox.clone();
        let poll_interval = self.poll_interval;
        let mut shutdown = self.core.shutdown_signal();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = drain_inbox(&core, &inbox).await {
                            warn!(%err, "inbox poll failed");
                            core.record_error();
                        }
                    }
                }
            }
            debug!(protocol = core.name(), "listener stopped");
        });
        self.core.set_listener(handle);
        Ok(())
    }

    async fn shutdown(&self) {
        self.core.stop_listening().await;
        self.core.set_status(ProtocolStatus::Disabled);
    }

    async fn send(&self, message: &FallbackMessage) -> FallbackResult<()> {
        self.core.ensure_active()?;
        let file_name = format!("{}_{}.json", message.id, self.node_id);
        let target = self.outbox.join(&file_name);
        let staging = self.outbox.join(format!(".{file_name}.tmp"));

        let bytes = serde_json::to_vec_pretty(message)?;
        let written = async {
            fs::write(&staging, &bytes)
                .await
                .map_err(|err| FallbackError::io(&staging, err))?;
            fs::rename(&staging, &target)
                .await
                .map_err(|err| FallbackError::io(&target, err))
        }
        .await;

        if let Err(err) = written {
            self.core.record_error();
            return Err(err);
        }
        self.core.record_sent();
        debug!(path = %target.display(), "message written to outbox");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.core.is_active()
            && fs::try_exists(&self.inbox).await.unwrap_or(false)
            && fs::try_exists(&self.outbox).await.unwrap_or(false)
    }

    fn register_handler(&self, message_type: &str, handler: FallbackHandler) {
        self.core.register_handler(message_type, handler);
    }

    fn status(&self) -> ProtocolStatus {
        self.core.status()
    }

    fn stats(&self) -> ProtocolStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{ANY_MESSAGE_TYPE, MessagePriority};

    fn temp_base() -> PathBuf {
        std::env::temp_dir().join(format!("hsp-fallback-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn paired_directories_deliver_across_nodes() {
        let base = temp_base();
        let a_to_b = base.join("a_to_b");
        let b_to_a = base.join("b_to_a");

        let alice = FileProtocol::new(&base)
            .with_outbox(&a_to_b)
            .with_inbox(&b_to_a)
            .with_poll_interval(Duration::from_millis(10));
        let bob = FileProtocol::new(&base)
            .with_outbox(&b_to_a)
            .with_inbox(&a_to_b)
            .with_poll_interval(Duration::from_millis(10));

        let (tx, mut rx) = unbounded_channel();
        bob.register_handler(
            ANY_MESSAGE_TYPE,
            Arc::new(move |message: FallbackMessage| {
                let _ = tx.send(message);
            }),
        );

        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();
        bob.start().await.unwrap();
        assert!(alice.health_check().await);

        let message = FallbackMessage::new("alice", "bob", "t", json!({"x": 1}), MessagePriority::High);
        alice.send(&message).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, message);

        bob.shutdown().await;
        let leftover = std::fs::read_dir(&a_to_b).unwrap().count();
        assert_eq!(leftover, 0);
        let _ = std::fs::remove_dir_all(base);
    }

    #[tokio::test]
    async fn malformed_files_are_discarded() {
        let base = temp_base();
        let protocol = FileProtocol::new(&base).with_poll_interval(Duration::from_millis(10));
        protocol.initialize().await.unwrap();
        std::fs::write(protocol.inbox().join("junk.json"), b"not json").unwrap();

        let delivered = drain_inbox(&protocol.core, protocol.inbox()).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(protocol.stats().errors, 1);
        assert_eq!(std::fs::read_dir(protocol.inbox()).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(base);
    }

    #[tokio::test]
    async fn zero_poll_interval_fails_initialize() {
        let base = temp_base();
        let protocol = FileProtocol::new(&base).with_poll_interval(Duration::ZERO);

        assert!(matches!(
            protocol.initialize().await,
            Err(FallbackError::InvalidConfig(_))
        ));
        assert_eq!(protocol.status(), ProtocolStatus::Failed);
        assert!(protocol.start().await.is_err());
        assert!(!base.exists());
    }
}
