//! In-process broker with MQTT-style wildcard routing.
//!
//! Several connectors in one process can share a [`MemoryBroker`], each through
//! its own [`BrokerTransport`]. Delivery is synchronous: `publish` returns after
//! every matching handler has run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use hsp_primitives::topics;
use tracing::{debug, trace};

use crate::{MessageHandler, Transport, TransportError, TransportResult};

struct Route {
    id: u64,
    client: u64,
    filter: String,
    handler: MessageHandler,
}

/// Shared in-process message broker.
pub struct MemoryBroker {
    routes: Mutex<Vec<Route>>,
    next_id: AtomicU64,
    available: AtomicBool,
    published: AtomicUsize,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemoryBroker")
            .field("routes", &routes.len())
            .field("available", &self.available.load(Ordering::Relaxed))
            .field("published", &self.published.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            published: AtomicUsize::new(0),
        })
    }

    /// Creates a client transport attached to this broker.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> BrokerTransport {
        BrokerTransport {
            broker: Arc::clone(self),
            client: self.next_id.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Simulates an outage: while unavailable, connects and publishes fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Returns `true` unless an outage is being simulated.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Total number of messages accepted for routing.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of installed subscriptions across every client.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delivers `payload` to every subscription matching `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn route(&self, topic: &str, payload: &Bytes) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let handlers: Vec<MessageHandler> = {
            let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            routes
                .iter()
                .filter(|route| topics::matches(&route.filter, topic))
                .map(|route| Arc::clone(&route.handler))
                .collect()
        };

        trace!(topic, receivers = handlers.len(), "broker routing message");
        for handler in &handlers {
            handler(topic.to_owned(), payload.clone());
        }
        handlers.len()
    }

    fn add_route(&self, client: u64, filter: &str, handler: MessageHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                id,
                client,
                filter: filter.to_owned(),
                handler,
            });
        id
    }

    fn remove_route(&self, id: u64) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|route| route.id != id);
    }

    fn remove_client(&self, client: u64) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|route| route.client != client);
    }
}

/// A client connection to a [`MemoryBroker`].
pub struct BrokerTransport {
    broker: Arc<MemoryBroker>,
    client: u64,
    connected: AtomicBool,
    subscriptions: Mutex<HashMap<String, u64>>,
}

impl fmt::Debug for BrokerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerTransport")
            .field("client", &self.client)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl BrokerTransport {
    /// Returns the broker this transport is attached to.
    #[must_use]
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    fn ensure_ready(&self) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn connect(&self) -> TransportResult<()> {
        if !self.broker.is_available() {
            return Err(TransportError::connect("broker unavailable"));
        }
        self.connected.store(true, Ordering::Release);
        debug!(client = self.client, "broker client connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::Release);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.broker.remove_client(self.client);
        debug!(client = self.client, "broker client disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, _qos: u8) -> TransportResult<()> {
        self.ensure_ready()?;
        if !self.broker.is_available() {
            return Err(TransportError::publish(topic, "broker unavailable"));
        }
        self.broker.route(topic, &payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()> {
        self.ensure_ready()?;
        let id = self.broker.add_route(self.client, topic, handler);
        let previous = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_owned(), id);
        if let Some(previous) = previous {
            self.broker.remove_route(previous);
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        if let Some(id) = removed {
            self.broker.remove_route(id);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
