//! Same-process queue protocol. Nothing survives a restart.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::protocol::ProtocolCore;
use crate::{
    FallbackError, FallbackHandler, FallbackMessage, FallbackProtocol, FallbackResult,
    ProtocolStats, ProtocolStatus,
};

/// Unbounded in-process queue drained by a listener task.
#[derive(Debug)]
pub struct InMemoryProtocol {
    core: Arc<ProtocolCore>,
    sender: mpsc::UnboundedSender<FallbackMessage>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<FallbackMessage>>>,
}

impl Default for InMemoryProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProtocol {
    /// Creates an uninitialized protocol.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            core: ProtocolCore::new("in_memory"),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }
}

#[async_trait]
impl FallbackProtocol for InMemoryProtocol {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn initialize(&self) -> FallbackResult<()> {
        self.core.set_status(ProtocolStatus::Active);
        info!(protocol = self.core.name(), "fallback protocol initialized");
        Ok(())
    }

    async fn start(&self) -> FallbackResult<()> {
        self.core.ensure_active()?;
        if !self.core.begin_listening() {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let receiver = Arc::clone(&self.receiver);
        let mut shutdown = self.core.shutdown_signal();
        let handle = tokio::spawn(async move {
            let mut receiver = receiver.lock().await;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    message = receiver.recv() => {
                        let Some(message) = message else { break };
                        core.deliver(message);
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
        self.sender.send(message.clone()).map_err(|_| {
            self.core.record_error();
            FallbackError::NotActive {
                protocol: self.core.name().to_owned(),
            }
        })?;
        self.core.record_sent();
        debug!(message_id = %message.id, "message queued in memory");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.core.is_active()
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
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{ANY_MESSAGE_TYPE, MessagePriority};

    #[tokio::test]
    async fn loops_messages_back_to_handlers() {
        let protocol = InMemoryProtocol::new();
        let (tx, mut rx) = unbounded_channel();
        protocol.register_handler(
            ANY_MESSAGE_TYPE,
            Arc::new(move |message: FallbackMessage| {
                let _ = tx.send(message.id);
            }),
        );

        protocol.initialize().await.unwrap();
        protocol.start().await.unwrap();
        let message = FallbackMessage::new("a", "b", "t", json!({"n": 1}), MessagePriority::Normal);
        protocol.send(&message).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, message.id);
        assert_eq!(protocol.stats().messages_sent, 1);

        protocol.shutdown().await;
        assert_eq!(protocol.status(), ProtocolStatus::Disabled);
        assert!(!protocol.health_check().await);
    }

    #[tokio::test]
    async fn send_requires_initialization() {
        let protocol = InMemoryProtocol::new();
        let message = FallbackMessage::new("a", "b", "t", json!({}), MessagePriority::Normal);
        assert!(matches!(
            protocol.send(&message).await,
            Err(FallbackError::NotActive { .. })
        ));
    }
}
