//! Priority-ordered, health-monitored set of fallback protocols.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    ANY_MESSAGE_TYPE, FallbackError, FallbackHandler, FallbackMessage, FallbackProtocol,
    FallbackResult, MessagePriority, ProtocolStats, ProtocolStatus,
};

/// Default interval between health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    health_check_interval: Duration,
    sender_id: String,
}

impl FallbackConfig {
    /// Creates a configuration.
    #[must_use]
    pub fn new(health_check_interval: Duration, sender_id: impl Into<String>) -> Self {
        Self {
            health_check_interval,
            sender_id: sender_id.into(),
        }
    }

    /// Interval of the health monitor.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// Sender id stamped on messages built by [`FallbackManager::send`] when
    /// the caller passes none.
    #[must_use]
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::InvalidConfig`] describing the first invalid
    /// field.
    pub fn validate(&self) -> FallbackResult<()> {
        if self.health_check_interval.is_zero() {
            return Err(FallbackError::InvalidConfig(
                "health check interval must be greater than zero",
            ));
        }
        if self.sender_id.trim().is_empty() {
            return Err(FallbackError::InvalidConfig("sender id cannot be empty"));
        }
        Ok(())
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_CHECK_INTERVAL, "system")
    }
}

/// Per-protocol entry of a [`FallbackStatus`] report.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolReport {
    /// Protocol name.
    pub name: String,
    /// Configured priority (higher is preferred).
    pub priority: i32,
    /// Whether `initialize` succeeded.
    pub initialized: bool,
    /// Protocol status.
    pub status: ProtocolStatus,
    /// Protocol counters.
    pub stats: ProtocolStats,
}

/// Snapshot of the manager's state.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatus {
    /// Whether `initialize` succeeded.
    pub initialized: bool,
    /// Name of the protocol currently used for sending.
    pub active_protocol: Option<String>,
    /// Every protocol in preference order.
    pub protocols: Vec<ProtocolReport>,
}

struct Entry {
    priority: i32,
    protocol: Arc<dyn FallbackProtocol>,
    initialized: AtomicBool,
}

type HandlerTable = Arc<RwLock<HashMap<String, Vec<FallbackHandler>>>>;

/// Ordered set of fallback protocols with failover and health monitoring.
///
/// Higher priority values are preferred; protocols of equal priority keep
/// their insertion order.
pub struct FallbackManager {
    config: FallbackConfig,
    entries: RwLock<Vec<Arc<Entry>>>,
    active: RwLock<Option<Arc<Entry>>>,
    handlers: HandlerTable,
    initialized: AtomicBool,
    shutdown: watch::Sender<bool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for FallbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackManager")
            .field("config", &self.config)
            .field("protocols", &self.protocol_names())
            .field("active", &self.active_protocol_name())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::with_valid_config(FallbackConfig::default())
    }
}

impl FallbackManager {
    /// Creates a manager without protocols.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::InvalidConfig`] when `config` is invalid.
    pub fn new(config: FallbackConfig) -> FallbackResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: FallbackConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            entries: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            initialized: AtomicBool::new(false),
            shutdown,
            monitor: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Adds a protocol. Intended for configuration time, before `initialize`.
    pub fn add_protocol(&self, protocol: Arc<dyn FallbackProtocol>, priority: i32) {
        let handlers = Arc::clone(&self.handlers);
        let name = protocol.name().to_owned();
        protocol.register_handler(
            ANY_MESSAGE_TYPE,
            Arc::new(move |message| dispatch(&handlers, message)),
        );

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let position = entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(entries.len());
        entries.insert(
            position,
            Arc::new(Entry {
                priority,
                protocol,
                initialized: AtomicBool::new(false),
            }),
        );
        debug!(protocol = %name, priority, position, "fallback protocol added");
    }

    /// Registers a handler for received messages of `message_type`
    /// ([`ANY_MESSAGE_TYPE`] for all), whichever protocol carried them.
    pub fn register_handler(&self, message_type: &str, handler: FallbackHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(message_type.to_owned())
            .or_default()
            .push(handler);
    }

    /// Initializes every protocol and selects the active one.
    ///
    /// Returns the number of protocols that initialized.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::NoProtocolAvailable`] if none did.
    pub async fn initialize(&self) -> FallbackResult<usize> {
        let mut ready = 0;
        for entry in self.entries_snapshot() {
            match entry.protocol.initialize().await {
                Ok(()) => {
                    entry.initialized.store(true, Ordering::Release);
                    ready += 1;
                }
                Err(err) => {
                    warn!(protocol = entry.protocol.name(), %err, "fallback protocol failed to initialize");
                }
            }
        }

        if ready == 0 {
            error!("no fallback protocol could be initialized");
            return Err(FallbackError::NoProtocolAvailable);
        }

        self.initialized.store(true, Ordering::Release);
        self.select_active_protocol().await;
        info!(ready, "fallback manager initialized");
        Ok(ready)
    }

    /// Starts every initialized protocol's listener and the health monitor.
    pub async fn start(self: &Arc<Self>) {
        for entry in self.initialized_entries() {
            if let Err(err) = entry.protocol.start().await {
                warn!(protocol = entry.protocol.name(), %err, "fallback protocol failed to start");
            }
        }

        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.shutdown.send_replace(false);
        let manager = Arc::downgrade(self);
        let interval = self.config.health_check_interval;
        let mut shutdown = self.shutdown.subscribe();
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.select_active_protocol().await;
                    }
                }
            }
            debug!("fallback health monitor stopped");
        }));
    }

    /// Picks the highest-priority healthy protocol and makes it active.
    ///
    /// Returns its name, or `None` when no protocol is healthy.
    pub async fn select_active_protocol(&self) -> Option<String> {
        for entry in self.initialized_entries() {
            if entry.protocol.health_check().await {
                let name = entry.protocol.name().to_owned();
                self.set_active(Some(entry));
                return Some(name);
            }
        }
        if self.active_protocol_name().is_some() {
            error!("no healthy fallback protocol");
        }
        self.set_active(None);
        None
    }

    /// Builds a message and sends it. Returns `true` on delivery by any protocol.
    pub async fn send(
        &self,
        sender_id: Option<&str>,
        recipient_id: &str,
        message_type: &str,
        payload: Value,
        priority: MessagePriority,
    ) -> bool {
        let sender = sender_id.unwrap_or(&self.config.sender_id);
        let message = FallbackMessage::new(sender, recipient_id, message_type, payload, priority);
        self.send_message(message).await
    }

    /// Sends a prepared message. Returns `true` on delivery by any protocol.
    pub async fn send_message(&self, message: FallbackMessage) -> bool {
        match self.try_send(message).await {
            Ok(protocol) => {
                debug!(protocol, "fallback delivery succeeded");
                true
            }
            Err(err) => {
                warn!(%err, "fallback delivery failed");
                false
            }
        }
    }

    /// Tries the active protocol first, then every other healthy protocol in
    /// priority order. Returns the name of the protocol that delivered.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::NoProtocolAvailable`] when nothing was healthy
    /// and [`FallbackError::AllProtocolsFailed`] when every attempt failed.
    pub async fn try_send(&self, mut message: FallbackMessage) -> FallbackResult<String> {
        if !self.is_initialized() {
            return Err(FallbackError::NoProtocolAvailable);
        }

        let active = match self.active_entry() {
            Some(entry) => Some(entry),
            None => {
                self.select_active_protocol().await;
                self.active_entry()
            }
        };

        let mut candidates: Vec<Arc<Entry>> = active.iter().cloned().collect();
        for entry in self.initialized_entries() {
            if !candidates.iter().any(|c| Arc::ptr_eq(c, &entry)) {
                candidates.push(entry);
            }
        }

        let mut attempted = 0;
        for (index, entry) in candidates.into_iter().enumerate() {
            let is_active = index == 0 && active.is_some();
            if !is_active && !entry.protocol.health_check().await {
                continue;
            }
            attempted += 1;
            match entry.protocol.send(&message).await {
                Ok(()) => {
                    let name = entry.protocol.name().to_owned();
                    if !is_active {
                        self.set_active(Some(entry));
                    }
                    return Ok(name);
                }
                Err(err) => {
                    warn!(protocol = entry.protocol.name(), message_id = %message.id, %err, "fallback protocol send failed");
                    message.retry_count += 1;
                }
            }
        }

        if attempted == 0 {
            Err(FallbackError::NoProtocolAvailable)
        } else {
            Err(FallbackError::AllProtocolsFailed { attempted })
        }
    }

    /// Returns `true` once `initialize` has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Name of the active protocol.
    #[must_use]
    pub fn active_protocol_name(&self) -> Option<String> {
        self.active_entry()
            .map(|entry| entry.protocol.name().to_owned())
    }

    /// Returns `true` when an active protocol exists and passes its health check.
    pub async fn is_healthy(&self) -> bool {
        match self.active_entry() {
            Some(entry) => entry.protocol.health_check().await,
            None => false,
        }
    }

    /// Status report for every protocol.
    #[must_use]
    pub fn status(&self) -> FallbackStatus {
        FallbackStatus {
            initialized: self.is_initialized(),
            active_protocol: self.active_protocol_name(),
            protocols: self
                .entries_snapshot()
                .iter()
                .map(|entry| ProtocolReport {
                    name: entry.protocol.name().to_owned(),
                    priority: entry.priority,
                    initialized: entry.initialized.load(Ordering::Acquire),
                    status: entry.protocol.status(),
                    stats: entry.protocol.stats(),
                })
                .collect(),
        }
    }

    /// Stops the health monitor and every protocol, waiting for their tasks.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = monitor {
            if let Err(err) = handle.await {
                warn!(%err, "fallback health monitor ended abnormally");
            }
        }

        for entry in self.entries_snapshot() {
            entry.protocol.shutdown().await;
            entry.initialized.store(false, Ordering::Release);
        }
        self.set_active(None);
        self.initialized.store(false, Ordering::Release);
        info!("fallback manager stopped");
    }

    fn protocol_names(&self) -> Vec<String> {
        self.entries_snapshot()
            .iter()
            .map(|entry| entry.protocol.name().to_owned())
            .collect()
    }

    fn entries_snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn initialized_entries(&self) -> Vec<Arc<Entry>> {
        self.entries_snapshot()
            .into_iter()
            .filter(|entry| entry.initialized.load(Ordering::Acquire))
            .collect()
    }

    fn active_entry(&self) -> Option<Arc<Entry>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, next: Option<Arc<Entry>>) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let changed = match (active.as_ref(), next.as_ref()) {
            (Some(current), Some(next)) => !Arc::ptr_eq(current, next),
            (None, None) => false,
            _ => true,
        };
        if changed {
            if let Some(next) = next.as_ref() {
                info!(protocol = next.protocol.name(), "switched active fallback protocol");
            }
        }
        *active = next;
    }
}

fn dispatch(handlers: &HandlerTable, message: FallbackMessage) {
    let matched: Vec<FallbackHandler> = {
        let table = handlers.read().unwrap_or_else(PoisonError::into_inner);
        table
            .get(&message.message_type)
            .into_iter()
            .chain(table.get(ANY_MESSAGE_TYPE))
            .flatten()
            .cloned()
            .collect()
    };
    for handler in matched {
        let message = message.clone();
        if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
            error!("fallback manager handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::InMemoryProtocol;

    struct ScriptedProtocol {
        name: &'static str,
        healthy: AtomicBool,
        fail_sends: AtomicBool,
        fail_init: bool,
        sends: AtomicUsize,
    }

    impl ScriptedProtocol {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                healthy: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
                fail_init: false,
                sends: AtomicUsize::new(0),
            })
        }

        fn broken(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                healthy: AtomicBool::new(false),
                fail_sends: AtomicBool::new(true),
                fail_init: true,
                sends: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FallbackProtocol for ScriptedProtocol {
        fn name(&self) -> &str {
            self.name
        }

        async fn initialize(&self) -> FallbackResult<()> {
            if self.fail_init {
                return Err(FallbackError::http("init failed"));
            }
            Ok(())
        }

        async fn start(&self) -> FallbackResult<()> {
            Ok(())
        }

        async fn shutdown(&self) {}

        async fn send(&self, _message: &FallbackMessage) -> FallbackResult<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(FallbackError::http("send failed"));
            }
            Ok(())
        }

        async fn health_check(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn register_handler(&self, _message_type: &str, _handler: FallbackHandler) {}

        fn status(&self) -> ProtocolStatus {
            ProtocolStatus::Active
        }

        fn stats(&self) -> ProtocolStats {
            ProtocolStats::default()
        }
    }

    fn message() -> FallbackMessage {
        FallbackMessage::new("a", "b", "t", json!({}), MessagePriority::Normal)
    }

    #[tokio::test]
    async fn higher_priority_wins_and_ties_keep_order() {
        let manager = FallbackManager::default();
        let low = ScriptedProtocol::new("low");
        let first = ScriptedProtocol::new("first");
        let second = ScriptedProtocol::new("second");
        manager.add_protocol(low, 1);
        manager.add_protocol(first, 5);
        manager.add_protocol(second, 5);

        assert_eq!(manager.initialize().await.unwrap(), 3);
        assert_eq!(manager.active_protocol_name().as_deref(), Some("first"));
        let order: Vec<_> = manager.status().protocols.into_iter().map(|p| p.name).collect();
        assert_eq!(order, vec!["first", "second", "low"]);
    }

    #[tokio::test]
    async fn fails_over_to_next_healthy_protocol() {
        let manager = FallbackManager::default();
        let primary = ScriptedProtocol::new("primary");
        let sick = ScriptedProtocol::new("sick");
        let backup = ScriptedProtocol::new("backup");
        manager.add_protocol(primary.clone(), 3);
        manager.add_protocol(sick.clone(), 2);
        manager.add_protocol(backup.clone(), 1);
        manager.initialize().await.unwrap();

        primary.fail_sends.store(true, Ordering::SeqCst);
        sick.healthy.store(false, Ordering::SeqCst);

        assert_eq!(manager.try_send(message()).await.unwrap(), "backup");
        assert_eq!(primary.sends.load(Ordering::SeqCst), 1);
        assert_eq!(sick.sends.load(Ordering::SeqCst), 0);
        assert_eq!(backup.sends.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_protocol_name().as_deref(), Some("backup"));
    }

    #[tokio::test]
    async fn reports_total_failure() {
        let manager = FallbackManager::default();
        let only = ScriptedProtocol::new("only");
        only.fail_sends.store(true, Ordering::SeqCst);
        manager.add_protocol(only, 1);
        manager.initialize().await.unwrap();

        assert!(matches!(
            manager.try_send(message()).await,
            Err(FallbackError::AllProtocolsFailed { attempted: 1 })
        ));
        assert!(!manager.send_message(message()).await);
    }

    #[tokio::test]
    async fn initialize_requires_one_protocol() {
        let manager = FallbackManager::default();
        manager.add_protocol(ScriptedProtocol::broken("broken"), 1);
        assert!(matches!(
            manager.initialize().await,
            Err(FallbackError::NoProtocolAvailable)
        ));
        assert!(!manager.send(None, "b", "t", json!({}), MessagePriority::Low).await);
    }

    #[tokio::test]
    async fn received_messages_reach_manager_handlers() {
        let manager = Arc::new(
            FallbackManager::new(FallbackConfig::new(Duration::from_millis(20), "node-a")).unwrap(),
        );
        manager.add_protocol(Arc::new(InMemoryProtocol::new()), 1);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.register_handler(
            "greeting",
            Arc::new(move |message: FallbackMessage| {
                let _ = tx.send(message.sender_id);
            }),
        );

        manager.initialize().await.unwrap();
        manager.start().await;
        assert!(manager.send(None, "b", "greeting", json!({"hi": true}), MessagePriority::High).await);

        let sender = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender, "node-a");
        assert!(manager.is_healthy().await);

        manager.shutdown().await;
        assert!(!manager.is_initialized());
        assert!(manager.status().active_protocol.is_none());
    }

    #[tokio::test]
    async fn health_monitor_tracks_protocol_health() {
        let manager = Arc::new(
            FallbackManager::new(FallbackConfig::new(Duration::from_millis(20), "node-a")).unwrap(),
        );
        let primary = ScriptedProtocol::new("primary");
        let backup = ScriptedProtocol::new("backup");
        manager.add_protocol(primary.clone(), 2);
        manager.add_protocol(backup.clone(), 1);
        manager.initialize().await.unwrap();
        manager.start().await;
        assert_eq!(manager.active_protocol_name().as_deref(), Some("primary"));

        primary.healthy.store(false, Ordering::SeqCst);
        wait_for_active(&manager, "backup").await;

        primary.healthy.store(true, Ordering::SeqCst);
        wait_for_active(&manager, "primary").await;

        backup.healthy.store(false, Ordering::SeqCst);
        primary.healthy.store(false, Ordering::SeqCst);
        for _ in 0..100 {
            if manager.active_protocol_name().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.active_protocol_name().is_none());
        assert!(!manager.is_healthy().await);

        manager.shutdown().await;
        assert_eq!(primary.sends.load(Ordering::SeqCst), 0);
    }

    async fn wait_for_active(manager: &FallbackManager, expected: &str) {
        for _ in 0..100 {
            if manager.active_protocol_name().as_deref() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{expected} never became active");
    }

    #[test]
    fn rejects_zero_health_check_interval() {
        let config = FallbackConfig::new(Duration::ZERO, "node-a");
        assert!(matches!(
            FallbackManager::new(config),
            Err(FallbackError::InvalidConfig(_))
        ));
        assert!(FallbackManager::new(FallbackConfig::new(Duration::from_secs(1), " ")).is_err());
    }
}
