//! The protocol seam and the bookkeeping shared by every implementation.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{FallbackMessage, FallbackResult};

/// Handler key that receives every message type.
pub const ANY_MESSAGE_TYPE: &str = "*";

/// Callback invoked for messages received on a protocol.
pub type FallbackHandler = Arc<dyn Fn(FallbackMessage) + Send + Sync>;

/// Operational status of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStatus {
    /// Ready to send and receive.
    Active,
    /// Usable with reduced function.
    Degraded,
    /// Initialization or operation failed.
    Failed,
    /// Not initialized or shut down.
    Disabled,
}

/// Traffic counters of a protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    /// Messages accepted for delivery.
    pub messages_sent: u64,
    /// Messages received and dispatched.
    pub messages_received: u64,
    /// Send or handler failures.
    pub errors: u64,
    /// Time of the last send or receive.
    pub last_activity: Option<DateTime<Utc>>,
}

/// Alternate transport used when the primary one is unavailable.
#[async_trait]
pub trait FallbackProtocol: Send + Sync {
    /// Stable protocol name, e.g. `in_memory`.
    fn name(&self) -> &str;

    /// Acquires resources. Must succeed before `send` or `start`.
    async fn initialize(&self) -> FallbackResult<()>;

    /// Starts receiving messages.
    async fn start(&self) -> FallbackResult<()>;

    /// Stops receiving and releases resources. Waits for background work.
    async fn shutdown(&self);

    /// Sends one message.
    async fn send(&self, message: &FallbackMessage) -> FallbackResult<()>;

    /// Returns `true` when the protocol can currently carry traffic.
    async fn health_check(&self) -> bool;

    /// Registers a handler for `message_type` ([`ANY_MESSAGE_TYPE`] for all).
    fn register_handler(&self, message_type: &str, handler: FallbackHandler);

    /// Current status.
    fn status(&self) -> ProtocolStatus;

    /// Traffic counters.
    fn stats(&self) -> ProtocolStats;
}

/// State shared by the bundled protocol implementations: status, counters,
/// handler table and the listener task.
pub(crate) struct ProtocolCore {
    name: &'static str,
    status: Mutex<ProtocolStatus>,
    stats: Mutex<ProtocolStats>,
    handlers: RwLock<HashMap<String, Vec<FallbackHandler>>>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ProtocolCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolCore")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ProtocolCore {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            name,
            status: Mutex::new(ProtocolStatus::Disabled),
            stats: Mutex::new(ProtocolStats::default()),
            handlers: RwLock::new(HashMap::new()),
            shutdown,
            listener: Mutex::new(None),
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn status(&self) -> ProtocolStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_status(&self, status: ProtocolStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status() == ProtocolStatus::Active
    }

    pub(crate) fn ensure_active(&self) -> FallbackResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(crate::FallbackError::NotActive {
                protocol: self.name.to_owned(),
            })
        }
    }

    pub(crate) fn stats(&self) -> ProtocolStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_sent(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.messages_sent += 1;
        stats.last_activity = Some(Utc::now());
    }

    pub(crate) fn record_error(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .errors += 1;
    }

    pub(crate) fn register_handler(&self, message_type: &str, handler: FallbackHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(message_type.to_owned())
            .or_default()
            .push(handler);
    }

    /// Dispatches a received message to the handlers for its type, then to
    /// the wildcard handlers. Expired messages are dropped.
    pub(crate) fn deliver(&self, message: FallbackMessage) {
        if message.is_expired() {
            warn!(protocol = self.name, message_id = %message.id, "dropping expired fallback message");
            return;
        }

        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.messages_received += 1;
            stats.last_activity = Some(Utc::now());
        }

        let handlers: Vec<FallbackHandler> = {
            let table = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            table
                .get(&message.message_type)
                .into_iter()
                .chain(table.get(ANY_MESSAGE_TYPE))
                .flatten()
                .cloned()
                .collect()
        };

        for handler in handlers {
            let message = message.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!(protocol = self.name, "fallback handler panicked");
                self.record_error();
            }
        }
    }

    /// Returns a receiver that observes the shutdown signal.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Records the listener task and clears any previous shutdown request.
    /// Returns `false` (and aborts nothing) when a listener is already running.
    pub(crate) fn begin_listening(&self) -> bool {
        let listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        self.shutdown.send_replace(false);
        true
    }

    pub(crate) fn set_listener(&self, handle: JoinHandle<()>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the listener to stop and waits for it to exit.
    pub(crate) async fn stop_listening(&self) {
        self.shutdown.send_replace(true);
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(protocol = self.name, %err, "fallback listener ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::MessagePriority;

    #[test]
    fn deliver_routes_by_type_and_wildcard() {
        let core = ProtocolCore::new("test");
        let typed = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&typed);
        core.register_handler("fact", Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&any);
        core.register_handler(ANY_MESSAGE_TYPE, Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        core.deliver(FallbackMessage::new("a", "b", "fact", json!({}), MessagePriority::Normal));
        core.deliver(FallbackMessage::new("a", "b", "other", json!({}), MessagePriority::Normal));

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 2);
        assert_eq!(core.stats().messages_received, 2);
    }

    #[test]
    fn expired_and_panicking_are_contained() {
        let core = ProtocolCore::new("test");
        core.register_handler(ANY_MESSAGE_TYPE, Arc::new(|_| panic!("handler failure")));

        let mut stale = FallbackMessage::new("a", "b", "t", json!({}), MessagePriority::Low)
            .with_ttl(Duration::from_secs(1));
        stale.timestamp -= chrono::Duration::seconds(10);
        core.deliver(stale);
        assert_eq!(core.stats().messages_received, 0);

        core.deliver(FallbackMessage::new("a", "b", "t", json!({}), MessagePriority::Low));
        let stats = core.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.errors, 1);
    }
}
