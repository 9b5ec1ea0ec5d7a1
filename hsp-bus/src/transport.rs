//! The narrow interface the HSP core uses to reach the network.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::TransportResult;

/// Callback invoked for every message delivered on a subscription.
///
/// Handlers run on the transport's delivery path and must not block.
pub type MessageHandler = Arc<dyn Fn(String, Bytes) + Send + Sync>;

/// Publish/subscribe transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the connection.
    async fn connect(&self) -> TransportResult<()>;

    /// Tears the connection down and drops every subscription.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Publishes an encoded envelope.
    async fn publish(&self, topic: &str, payload: Bytes, qos: u8) -> TransportResult<()>;

    /// Installs `handler` for messages matching the `topic` filter.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()>;

    /// Removes the subscription for `topic`.
    async fn unsubscribe(&self, topic: &str) -> TransportResult<()>;

    /// Returns `true` while connected.
    fn is_connected(&self) -> bool;
}
