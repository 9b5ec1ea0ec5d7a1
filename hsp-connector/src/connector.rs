//! The connector facade: reliable publishing, typed inbound dispatch and
//! fallback delivery.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use hsp_bus::{
    BusMessage, InternalBus, MessageBridge, SubscriptionId, Transport, TransportError,
    inbound_channel,
};
use hsp_fallback::{ANY_MESSAGE_TYPE, FallbackManager, FallbackMessage};
use hsp_primitives::{
    AcknowledgementPayload, BROADCAST_RECIPIENT, CapabilityAdvertisement, FactPayload,
    MessageEnvelope, MessageType, Payload, PeerId, TaskRequestPayload, TaskResultPayload, topics,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::ack::{AckSignal, PendingAcks};
use crate::dispatch::{CallbackRegistry, CallbackResult, LifecycleCallbacks};
use crate::{
    CommunicationStatus, ConnectionEvent, ConnectionState, ConnectorConfig, ConnectorError,
    ConnectorResult, Delivery, HealthReport, Lifecycle, TaskScheduler,
};

/// Topic reported for envelopes that arrived through a fallback protocol.
pub const FALLBACK_TOPIC: &str = "hsp/fallback";

/// Supplies the capabilities re-advertised after every connect.
pub type CapabilityProvider = Arc<dyn Fn() -> Vec<CapabilityAdvertisement> + Send + Sync>;

enum AckOutcome {
    Acknowledged,
    Exhausted,
    DeadlineExceeded,
    Cancelled,
    TransportFailed(ConnectorError),
}

/// Builder for [`HspConnector`].
pub struct HspConnectorBuilder {
    ai_id: PeerId,
    transport: Arc<dyn Transport>,
    config: ConnectorConfig,
    fallback: Option<Arc<FallbackManager>>,
    bus: Option<Arc<InternalBus<BusMessage>>>,
    scheduler: Option<TaskScheduler>,
}

impl fmt::Debug for HspConnectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HspConnectorBuilder")
            .field("ai_id", &self.ai_id)
            .field("config", &self.config)
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl HspConnectorBuilder {
    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `fallback` when the transport cannot deliver.
    #[must_use]
    pub fn fallback(mut self, fallback: Arc<FallbackManager>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Shares an existing internal bus instead of creating one.
    #[must_use]
    pub fn bus(mut self, bus: Arc<InternalBus<BusMessage>>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Runs inbound dispatch on `scheduler`.
    #[must_use]
    pub fn scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the connector and wires it to the bus and the fallback manager.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidConfig`] when the configuration is invalid.
    pub fn build(self) -> ConnectorResult<HspConnector> {
        self.config.validate()?;

        let bus = self.bus.unwrap_or_else(|| Arc::new(InternalBus::new()));
        let bridge = MessageBridge::new(Arc::clone(&self.transport), Arc::clone(&bus));
        let fallback_enabled = self.config.fallback_enabled();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let subscriptions = MessageType::ALL
                .into_iter()
                .map(|message_type| {
                    let channel = inbound_channel(message_type);
                    let connector = weak.clone();
                    let id = bus.subscribe(channel.clone(), move |message: &BusMessage| {
                        let BusMessage::Inbound { topic, envelope } = message else {
                            return;
                        };
                        if let Some(inner) = connector.upgrade() {
                            inner.schedule_dispatch(topic.clone(), Arc::clone(envelope));
                        }
                    });
                    (channel, id)
                })
                .collect();

            Inner {
                lifecycle: Mutex::new(Lifecycle::new(self.ai_id.clone())),
                ai_id: self.ai_id,
                config: self.config,
                transport: self.transport,
                bridge,
                fallback: self.fallback,
                scheduler: self.scheduler.unwrap_or_default(),
                pending: Arc::new(PendingAcks::default()),
                subscriptions,
                facts: CallbackRegistry::new("fact"),
                capabilities: CallbackRegistry::new("capability_advertisement"),
                task_requests: CallbackRegistry::new("task_request"),
                task_results: CallbackRegistry::new("task_result"),
                acknowledgements: CallbackRegistry::new("acknowledgement"),
                on_connect: LifecycleCallbacks::new("connect"),
                on_disconnect: LifecycleCallbacks::new("disconnect"),
                capability_provider: RwLock::new(None),
            }
        });

        if let Some(fallback) = inner.fallback.as_ref().filter(|_| fallback_enabled) {
            let connector = Arc::downgrade(&inner);
            fallback.register_handler(
                ANY_MESSAGE_TYPE,
                Arc::new(move |message: FallbackMessage| {
                    if let Some(inner) = connector.upgrade() {
                        inner.on_fallback_message(message);
                    }
                }),
            );
        }

        Ok(HspConnector { inner })
    }
}

/// HSP connector facade.
///
/// Cloning is cheap; clones share the same connection and registries.
#[derive(Debug, Clone)]
pub struct HspConnector {
    inner: Arc<Inner>,
}

struct Inner {
    ai_id: PeerId,
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    bridge: Arc<MessageBridge>,
    fallback: Option<Arc<FallbackManager>>,
    scheduler: TaskScheduler,
    lifecycle: Mutex<Lifecycle>,
    pending: Arc<PendingAcks>,
    subscriptions: Vec<(String, SubscriptionId)>,
    facts: CallbackRegistry<FactPayload>,
    capabilities: CallbackRegistry<CapabilityAdvertisement>,
    task_requests: CallbackRegistry<TaskRequestPayload>,
    task_results: CallbackRegistry<TaskResultPayload>,
    acknowledgements: CallbackRegistry<AcknowledgementPayload>,
    on_connect: LifecycleCallbacks,
    on_disconnect: LifecycleCallbacks,
    capability_provider: RwLock<Option<CapabilityProvider>>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HspConnector")
            .field("ai_id", &self.ai_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("transport", &"dyn Transport")
            .field("fallback", &self.fallback)
            .field("pending_acks", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let bus = self.bridge.bus();
        for (channel, id) in &self.subscriptions {
            bus.unsubscribe(channel, *id);
        }
    }
}

impl HspConnector {
    /// Starts building a connector for `ai_id` over `transport`.
    #[must_use]
    pub fn builder(ai_id: PeerId, transport: Arc<dyn Transport>) -> HspConnectorBuilder {
        HspConnectorBuilder {
            ai_id,
            transport,
            config: ConnectorConfig::default(),
            fallback: None,
            bus: None,
            scheduler: None,
        }
    }

    /// Identity used as sender of every envelope.
    #[must_use]
    pub fn ai_id(&self) -> &PeerId {
        &self.inner.ai_id
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Bridge between the transport and the internal bus.
    #[must_use]
    pub fn bridge(&self) -> &Arc<MessageBridge> {
        &self.inner.bridge
    }

    /// Fallback manager, when configured.
    #[must_use]
    pub fn fallback(&self) -> Option<&Arc<FallbackManager>> {
        self.inner.fallback.as_ref()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of acknowledgements currently awaited.
    #[must_use]
    pub fn pending_ack_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Connects the transport with bounded exponential backoff, subscribes to
    /// this peer's topics and brings up fallback delivery.
    ///
    /// Returns `true` when the primary transport is usable. Fallback is
    /// started either way, so messaging degrades rather than stops.
    pub async fn connect(&self) -> bool {
        let inner = &self.inner;
        if let Err(err) = inner.transition(ConnectionEvent::Connect) {
            warn!(%err, "connect rejected");
            return false;
        }

        let connected = inner.connect_transport().await;
        let subscribed = connected && inner.subscribe_topics().await;
        let event = if subscribed {
            ConnectionEvent::Established
        } else {
            ConnectionEvent::TransportLost
        };
        let state = inner
            .transition(event)
            .unwrap_or_else(|_| inner.state());

        if inner.config.fallback_enabled() {
            inner.start_fallback().await;
        }

        if subscribed {
            info!(ai_id = %inner.ai_id, "connected");
            inner.on_connect.run().await;
        } else {
            error!(ai_id = %inner.ai_id, ?state, "transport unavailable; relying on fallback");
        }

        self.advertise_provided_capabilities().await;
        state.is_hsp_available()
    }

    /// Disconnects the transport, stops fallback protocols and cancels every
    /// in-flight acknowledgement wait.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let cancelled = inner.pending.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "acknowledgement waits cancelled");
        }

        if let Err(err) = inner.transport.disconnect().await {
            warn!(%err, "transport disconnect failed");
        }
        if let Some(fallback) = &inner.fallback {
            fallback.shutdown().await;
        }
        if let Err(err) = inner.transition(ConnectionEvent::Disconnect) {
            debug!(%err, "disconnect on closed connector");
            return;
        }
        info!(ai_id = %inner.ai_id, "disconnected");
        inner.on_disconnect.run().await;
    }

    /// Disconnects and closes the connector. Later calls are rejected with
    /// [`ConnectorError::Closed`].
    pub async fn shutdown(&self) {
        self.disconnect().await;
        if let Err(err) = self.inner.transition(ConnectionEvent::Close) {
            debug!(%err, "connector already closed");
        }
        self.inner.scheduler.close();
    }

    /// Publishes `envelope` on `topic`, reporting only success.
    pub async fn publish_message(&self, topic: &str, envelope: &MessageEnvelope) -> bool {
        match self.try_publish(topic, envelope).await {
            Ok(delivery) => {
                debug!(topic, message_id = %envelope.message_id, ?delivery, "envelope delivered");
                true
            }
            Err(err) => {
                warn!(topic, message_id = %envelope.message_id, %err, "envelope not delivered");
                false
            }
        }
    }

    /// Publishes `envelope` on `topic`.
    ///
    /// Envelopes requiring an acknowledgement are re-published until one
    /// arrives or the retries run out, then handed to the fallback manager
    /// once. A transport error skips straight to fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::RetriesExhausted`],
    /// [`ConnectorError::FallbackUnavailable`], [`ConnectorError::Cancelled`]
    /// or [`ConnectorError::Closed`].
    pub async fn try_publish(&self, topic: &str, envelope: &MessageEnvelope) -> ConnectorResult<Delivery> {
        self.inner.try_publish(topic, envelope).await
    }

    /// Publishes a fact on `topic`, or on this peer's fact topic.
    pub async fn publish_fact(&self, payload: FactPayload, topic: Option<&str>) -> bool {
        let envelope = MessageEnvelope::fact(self.inner.ai_id.clone(), payload);
        let topic = topic.map_or_else(|| topics::facts(&self.inner.ai_id), str::to_owned);
        self.publish_message(&topic, &envelope).await
    }

    /// Sends a task request and returns its correlation id.
    ///
    /// Waits at most the configured task request deadline for the
    /// acknowledgement.
    pub async fn send_task_request(
        &self,
        payload: TaskRequestPayload,
        recipient: &str,
    ) -> Option<String> {
        let deadline = self.inner.config.task_request_deadline();
        match self.send_task_request_with_deadline(payload, recipient, deadline).await {
            Ok(correlation_id) => Some(correlation_id),
            Err(err) => {
                warn!(recipient, %err, "task request not delivered");
                None
            }
        }
    }

    /// Sends a task request, bounding the acknowledgement wait by `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::AckTimeout`] when the deadline passes, plus
    /// the errors of [`Self::try_publish`].
    pub async fn send_task_request_with_deadline(
        &self,
        payload: TaskRequestPayload,
        recipient: &str,
        deadline: Option<Duration>,
    ) -> ConnectorResult<String> {
        let envelope = MessageEnvelope::task_request(self.inner.ai_id.clone(), recipient, payload);
        let correlation_id = envelope.ack_key().to_owned();
        let topic = topics::resolve_request_topic(&envelope.recipient_ai_id);

        let delivery = if envelope.requires_ack() {
            self.inner.publish_with_ack(&topic, &envelope, deadline).await?
        } else {
            self.inner.try_publish(&topic, &envelope).await?
        };
        debug!(%correlation_id, topic, ?delivery, "task request sent");
        Ok(correlation_id)
    }

    /// Sends a task result to `recipient` (a peer id or an explicit topic).
    pub async fn send_task_result(
        &self,
        payload: TaskResultPayload,
        recipient: &str,
        correlation_id: &str,
    ) -> bool {
        let envelope = MessageEnvelope::task_result(
            self.inner.ai_id.clone(),
            recipient,
            correlation_id,
            payload,
        );
        let topic = topics::resolve_result_topic(recipient);
        self.publish_message(&topic, &envelope).await
    }

    /// Advertises a capability on this peer's advertisement topic.
    pub async fn advertise_capability(&self, payload: CapabilityAdvertisement) -> bool {
        let topic = topics::capability_advertisements(&self.inner.ai_id);
        let envelope = MessageEnvelope::capability_advertisement(self.inner.ai_id.clone(), payload);
        self.publish_message(&topic, &envelope).await
    }

    /// Registers the source of capabilities re-advertised on connect.
    pub fn register_capability_provider<F>(&self, provider: F)
    where
        F: Fn() -> Vec<CapabilityAdvertisement> + Send + Sync + 'static,
    {
        *self
            .inner
            .capability_provider
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(provider));
    }

    /// Registers a callback for inbound facts.
    pub fn register_fact_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(FactPayload, PeerId, Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.facts.register(callback);
    }

    /// Registers a callback for inbound capability advertisements.
    pub fn register_capability_advertisement_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(CapabilityAdvertisement, PeerId, Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.capabilities.register(callback);
    }

    /// Registers a callback for inbound task requests.
    pub fn register_task_request_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(TaskRequestPayload, PeerId, Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.task_requests.register(callback);
    }

    /// Registers a callback for inbound task results.
    pub fn register_task_result_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(TaskResultPayload, PeerId, Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.task_results.register(callback);
    }

    /// Registers a callback for inbound acknowledgements.
    pub fn register_acknowledgement_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(AcknowledgementPayload, PeerId, Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.acknowledgements.register(callback);
    }

    /// Registers a callback run after a successful connect.
    pub fn register_connect_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.on_connect.register(callback);
    }

    /// Registers a callback run after disconnecting.
    pub fn register_disconnect_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.on_disconnect.register(callback);
    }

    /// Best-effort snapshot of the connector's delivery paths.
    #[must_use]
    pub fn communication_status(&self) -> CommunicationStatus {
        let inner = &self.inner;
        let state = inner.state();
        CommunicationStatus {
            hsp_available: state.is_hsp_available(),
            is_connected: inner.transport.is_connected(),
            state,
            fallback_enabled: inner.config.fallback_enabled(),
            fallback_initialized: inner
                .fallback
                .as_ref()
                .is_some_and(|fallback| fallback.is_initialized()),
            pending_acks: inner.pending.len(),
            fallback: inner.fallback.as_ref().map(|fallback| fallback.status()),
        }
    }

    /// Checks both delivery paths.
    pub async fn health_check(&self) -> HealthReport {
        let inner = &self.inner;
        let hsp_healthy = inner.transport.is_connected() && inner.state().is_hsp_available();
        let fallback_healthy = match &inner.fallback {
            Some(fallback) if inner.config.fallback_enabled() => fallback.is_healthy().await,
            _ => false,
        };
        HealthReport {
            hsp_healthy,
            fallback_healthy,
            overall_healthy: hsp_healthy || fallback_healthy,
        }
    }

    async fn advertise_provided_capabilities(&self) {
        let provider = self
            .inner
            .capability_provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(provider) = provider else {
            return;
        };
        for capability in provider() {
            let id = capability.capability_id.clone();
            if !self.advertise_capability(capability).await {
                warn!(capability = %id, "capability re-advertisement failed");
            }
        }
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    fn transition(&self, event: ConnectionEvent) -> ConnectorResult<ConnectionState> {
        Ok(self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transition(event)?)
    }

    fn ensure_open(&self) -> ConnectorResult<()> {
        if self.state().is_terminal() {
            Err(ConnectorError::Closed)
        } else {
            Ok(())
        }
    }

    /// Marks the transport usable again after a successful publish, or
    /// degraded after a failed one.
    fn note_transport(&self, healthy: bool) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let event = match (healthy, lifecycle.state()) {
            (true, ConnectionState::Degraded) => ConnectionEvent::Established,
            (false, ConnectionState::Connected) => ConnectionEvent::TransportLost,
            _ => return,
        };
        if let Err(err) = lifecycle.transition(event) {
            debug!(%err, "transport health transition skipped");
        }
    }

    async fn connect_transport(&self) -> bool {
        let attempts = self.config.connect_attempts();
        let mut backoff = self.config.connect_backoff();
        for attempt in 1..=attempts {
            match self.transport.connect().await {
                Ok(()) => return true,
                Err(err) => {
                    warn!(attempt, attempts, %err, "transport connect failed");
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        false
    }

    async fn subscribe_topics(&self) -> bool {
        let handler = self.bridge.inbound_handler();
        let filters = [
            topics::facts_wildcard(),
            topics::capability_advertisements_wildcard(),
            topics::requests(&self.ai_id),
            topics::results(&self.ai_id),
            topics::acks(&self.ai_id),
        ];
        for filter in filters {
            if let Err(err) = self.transport.subscribe(&filter, Arc::clone(&handler)).await {
                warn!(topic = %filter, %err, "subscription failed");
                return false;
            }
            debug!(topic = %filter, "subscribed");
        }
        true
    }

    async fn start_fallback(&self) {
        let Some(fallback) = &self.fallback else {
            return;
        };
        if !fallback.is_initialized() {
            match fallback.initialize().await {
                Ok(count) => info!(protocols = count, "fallback initialized"),
                Err(err) => {
                    error!(%err, "fallback initialization failed");
                    return;
                }
            }
        }
        fallback.start().await;
    }

    async fn try_publish(&self, topic: &str, envelope: &MessageEnvelope) -> ConnectorResult<Delivery> {
        self.ensure_open()?;
        if envelope.requires_ack() {
            return self.publish_with_ack(topic, envelope, None).await;
        }

        match self.publish_once(topic, envelope).await {
            Ok(()) => Ok(Delivery::Transport),
            Err(err) => {
                let protocol = self.send_via_fallback(envelope).await.inspect_err(|fallback| {
                    warn!(topic, transport = %err, %fallback, "no delivery path");
                })?;
                Ok(Delivery::Fallback { protocol })
            }
        }
    }

    /// Runs the acknowledgement state machine for one envelope.
    ///
    /// At most `max_ack_retries + 1` transport publishes are made. The pending
    /// entry lives until this function returns.
    async fn publish_with_ack(
        &self,
        topic: &str,
        envelope: &MessageEnvelope,
        deadline: Option<Duration>,
    ) -> ConnectorResult<Delivery> {
        self.ensure_open()?;
        let max_retries = self.config.max_ack_retries();
        let ack_timeout = self.config.ack_timeout();
        let (guard, mut wait) = self.pending.register(envelope.ack_key(), topic, max_retries)?;
        let key = guard.key().to_owned();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        let outcome = loop {
            attempts += 1;
            if let Err(err) = self.publish_once(topic, envelope).await {
                break AckOutcome::TransportFailed(err);
            }

            let retries_left = max_retries.saturating_sub(attempts - 1);
            self.pending.set_retries_left(&key, retries_left);
            let wait_for = deadline.map_or(ack_timeout, |deadline| {
                deadline.saturating_sub(started.elapsed()).min(ack_timeout)
            });

            match tokio::time::timeout(wait_for, &mut wait).await {
                Ok(Ok(AckSignal::Acknowledged)) => break AckOutcome::Acknowledged,
                Ok(Ok(AckSignal::Cancelled) | Err(_)) => break AckOutcome::Cancelled,
                Err(_) if deadline.is_some_and(|deadline| started.elapsed() >= deadline) => {
                    break AckOutcome::DeadlineExceeded;
                }
                Err(_) if retries_left == 0 => break AckOutcome::Exhausted,
                Err(_) => {
                    debug!(correlation_id = %key, attempts, retries_left, "no acknowledgement; retrying");
                }
            }
        };

        let result = match outcome {
            AckOutcome::Acknowledged => {
                debug!(correlation_id = %key, attempts, "acknowledged");
                Ok(Delivery::Acknowledged { attempts })
            }
            AckOutcome::TransportFailed(err) => {
                let protocol = self.send_via_fallback(envelope).await.inspect_err(|fallback| {
                    warn!(correlation_id = %key, transport = %err, %fallback, "no delivery path");
                })?;
                Ok(Delivery::Fallback { protocol })
            }
            AckOutcome::Exhausted => {
                warn!(correlation_id = %key, attempts, "acknowledgement retries exhausted");
                match self.send_via_fallback(envelope).await {
                    Ok(protocol) => Ok(Delivery::Fallback { protocol }),
                    Err(err) => {
                        debug!(correlation_id = %key, %err, "fallback after exhaustion failed");
                        Err(ConnectorError::RetriesExhausted {
                            correlation_id: key.clone(),
                            attempts,
                        })
                    }
                }
            }
            AckOutcome::DeadlineExceeded => Err(ConnectorError::AckTimeout {
                correlation_id: key.clone(),
                waited: started.elapsed(),
            }),
            AckOutcome::Cancelled => Err(ConnectorError::Cancelled {
                correlation_id: key.clone(),
            }),
        };
        drop(guard);
        result
    }

    async fn publish_once(&self, topic: &str, envelope: &MessageEnvelope) -> ConnectorResult<()> {
        if !self.transport.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        match self
            .bridge
            .publish_external(topic, envelope, self.config.default_qos())
            .await
        {
            Ok(()) => {
                self.note_transport(true);
                Ok(())
            }
            Err(err) => {
                warn!(topic, message_id = %envelope.message_id, %err, "transport publish failed");
                self.note_transport(false);
                Err(err.into())
            }
        }
    }

    async fn send_via_fallback(&self, envelope: &MessageEnvelope) -> ConnectorResult<String> {
        if !self.config.fallback_enabled() {
            return Err(ConnectorError::fallback("fallback disabled"));
        }
        let Some(fallback) = &self.fallback else {
            return Err(ConnectorError::fallback("no fallback manager configured"));
        };

        let mut message = FallbackMessage::new(
            self.ai_id.as_str(),
            envelope.recipient_ai_id.as_str(),
            envelope.message_type().as_wire_str(),
            envelope.to_value()?,
            envelope.qos_parameters.priority.into(),
        );
        if let Some(correlation_id) = &envelope.correlation_id {
            message = message.with_correlation_id(correlation_id.as_str());
        }

        let protocol = fallback
            .try_send(message)
            .await
            .map_err(|err| ConnectorError::fallback(err.to_string()))?;
        info!(message_id = %envelope.message_id, protocol, "envelope delivered via fallback");
        Ok(protocol)
    }

    fn on_fallback_message(&self, message: FallbackMessage) {
        let envelope = match MessageEnvelope::from_value(message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(message_id = %message.id, %err, "dropping undecodable fallback message");
                return;
            }
        };
        if envelope.sender_ai_id == self.ai_id {
            return;
        }
        let recipient = envelope.recipient_ai_id.as_str();
        if recipient != BROADCAST_RECIPIENT && recipient != self.ai_id.as_str() {
            debug!(message_id = %envelope.message_id, recipient, "fallback message for another peer");
            return;
        }
        self.bridge.dispatch_envelope(FALLBACK_TOPIC, Arc::new(envelope));
    }

    fn schedule_dispatch(self: &Arc<Self>, topic: String, envelope: Arc<MessageEnvelope>) {
        if Handle::try_current().is_err() {
            error!(topic, message_id = %envelope.message_id, "inbound envelope dropped: no async runtime");
            return;
        }
        let inner = Arc::clone(self);
        if let Err(err) = self.scheduler.spawn(async move {
            inner.dispatch(&topic, envelope).await;
        }) {
            debug!(%err, "inbound dispatch rejected");
        }
    }

    async fn dispatch(&self, topic: &str, envelope: Arc<MessageEnvelope>) {
        if envelope.sender_ai_id == self.ai_id {
            return;
        }
        let sender = envelope.sender_ai_id.clone();
        let handled = match &envelope.payload {
            Payload::Fact(payload) => self.facts.run(payload, &sender, &envelope).await,
            Payload::CapabilityAdvertisement(payload) => {
                self.capabilities.run(payload, &sender, &envelope).await
            }
            Payload::TaskRequest(payload) => {
                self.task_requests.run(payload, &sender, &envelope).await
            }
            Payload::TaskResult(payload) => self.task_results.run(payload, &sender, &envelope).await,
            Payload::Acknowledgement(payload) => {
                self.resolve_ack(&envelope, payload);
                self.acknowledgements.run(payload, &sender, &envelope).await
            }
        };
        debug!(
            topic,
            message_id = %envelope.message_id,
            message_type = %envelope.message_type(),
            handled,
            "inbound envelope dispatched"
        );

        if envelope.requires_ack() && envelope.message_type() != MessageType::Acknowledgement {
            self.send_ack(&envelope).await;
        }
    }

    fn resolve_ack(&self, envelope: &MessageEnvelope, ack: &AcknowledgementPayload) {
        let resolved = envelope
            .correlation_id
            .as_deref()
            .is_some_and(|key| self.pending.resolve(key))
            || self.pending.resolve(&ack.target_message_id);
        if resolved {
            debug!(target_message_id = %ack.target_message_id, "acknowledgement matched");
        } else {
            debug!(target_message_id = %ack.target_message_id, "acknowledgement for unknown or settled message");
        }
    }

    async fn send_ack(&self, original: &MessageEnvelope) {
        let ack = MessageEnvelope::acknowledgement(self.ai_id.clone(), original);
        let topic = topics::acks(&original.sender_ai_id);
        match self.try_publish(&topic, &ack).await {
            Ok(delivery) => debug!(topic, target_message_id = %original.message_id, ?delivery, "acknowledgement sent"),
            Err(err) => warn!(topic, target_message_id = %original.message_id, %err, "acknowledgement not sent"),
        }
    }
}
