//! Capability registry fed by advertisements, filtered by trust and pruned
//! when advertisers go quiet.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hsp_primitives::{CapabilityAdvertisement, CapabilityId, MessageEnvelope, PeerId};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{DiscoveryError, DiscoveryResult, TrustManager};

/// Records older than this are considered stale.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);
/// Interval between background pruning passes.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Tuning for [`ServiceDiscovery`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryConfig {
    staleness_threshold: Duration,
    prune_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }
}

impl DiscoveryConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(staleness_threshold: Duration, prune_interval: Duration) -> Self {
        Self {
            staleness_threshold,
            prune_interval,
        }
    }

    /// Age after which a record is stale.
    #[must_use]
    pub const fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Interval between pruning passes.
    #[must_use]
    pub const fn prune_interval(&self) -> Duration {
        self.prune_interval
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidConfig`] when either duration is zero.
    pub fn validate(&self) -> DiscoveryResult<()> {
        if self.staleness_threshold.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "staleness threshold must be greater than zero",
            ));
        }
        if self.prune_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "prune interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// A known capability together with who advertised it and when.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Transport-level sender of the advertisement.
    pub advertiser_id: PeerId,
    /// Advertised capability.
    pub payload: CapabilityAdvertisement,
    /// Time the advertisement was last processed.
    pub last_seen: DateTime<Utc>,
}

impl CapabilityRecord {
    /// Identifier of the capability.
    #[must_use]
    pub fn capability_id(&self) -> &CapabilityId {
        &self.payload.capability_id
    }

    /// Returns `true` when the record is older than `threshold` at `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        is_older_than(self.last_seen, now, threshold)
    }
}

fn is_older_than(seen: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    // A negative age (clock skew) is never stale.
    (now - seen).to_std().is_ok_and(|age| age > threshold)
}

/// Filters for [`ServiceDiscovery::find_capabilities`].
#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityQuery {
    capability_id: Option<CapabilityId>,
    name: Option<String>,
    tags: Vec<String>,
    min_trust_score: Option<f64>,
    sort_by_trust: bool,
    include_unavailable: bool,
}

impl Default for CapabilityQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityQuery {
    /// Query matching every available, non-stale capability.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capability_id: None,
            name: None,
            tags: Vec::new(),
            min_trust_score: None,
            sort_by_trust: false,
            include_unavailable: false,
        }
    }

    /// Only the capability with this exact id.
    #[must_use]
    pub fn capability_id(mut self, id: CapabilityId) -> Self {
        self.capability_id = Some(id);
        self
    }

    /// Only capabilities with this exact name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require the tag; every required tag must be advertised.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Drop advertisers whose trust score is below `score`.
    #[must_use]
    pub const fn min_trust_score(mut self, score: f64) -> Self {
        self.min_trust_score = Some(score);
        self
    }

    /// Order results by advertiser trust, highest first.
    #[must_use]
    pub const fn sort_by_trust(mut self, enabled: bool) -> Self {
        self.sort_by_trust = enabled;
        self
    }

    /// Keep capabilities whose availability is offline or busy.
    #[must_use]
    pub const fn include_unavailable(mut self, enabled: bool) -> Self {
        self.include_unavailable = enabled;
        self
    }

    fn matches(&self, payload: &CapabilityAdvertisement) -> bool {
        if self
            .capability_id
            .as_ref()
            .is_some_and(|id| *id != payload.capability_id)
        {
            return false;
        }
        if self.name.as_ref().is_some_and(|name| *name != payload.name) {
            return false;
        }
        if !self.include_unavailable && !payload.availability_status.is_available() {
            return false;
        }
        payload.has_all_tags(&self.tags)
    }
}

#[derive(Debug)]
struct Stored {
    record: CapabilityRecord,
    seq: u64,
}

#[derive(Debug, Default)]
struct Store {
    records: HashMap<CapabilityId, Stored>,
    next_seq: u64,
}

/// Registry of capabilities advertised by peers.
pub struct ServiceDiscovery {
    config: DiscoveryConfig,
    trust: Arc<TrustManager>,
    store: Mutex<Store>,
    shutdown: watch::Sender<bool>,
    pruner: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ServiceDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDiscovery")
            .field("config", &self.config)
            .field("capabilities", &self.len())
            .finish_non_exhaustive()
    }
}

impl ServiceDiscovery {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidConfig`] when `config` is invalid.
    pub fn new(config: DiscoveryConfig, trust: Arc<TrustManager>) -> DiscoveryResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            trust,
            store: Mutex::new(Store::default()),
            shutdown,
            pruner: Mutex::new(None),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Trust store consulted by queries.
    #[must_use]
    pub fn trust(&self) -> &Arc<TrustManager> {
        &self.trust
    }

    /// Records an advertisement received from `sender`, stamped with the current time.
    pub fn process_capability_advertisement(
        &self,
        payload: CapabilityAdvertisement,
        sender: &PeerId,
        envelope: &MessageEnvelope,
    ) -> bool {
        self.process_capability_advertisement_at(payload, sender, envelope, Utc::now())
    }

    /// Records an advertisement as seen at `seen_at`.
    ///
    /// The latest advertisement for a capability id replaces the previous
    /// one. An advertisement older than the stored record is ignored and
    /// `false` is returned.
    pub fn process_capability_advertisement_at(
        &self,
        payload: CapabilityAdvertisement,
        sender: &PeerId,
        envelope: &MessageEnvelope,
        seen_at: DateTime<Utc>,
    ) -> bool {
        if payload.ai_id != *sender {
            warn!(
                capability = %payload.capability_id,
                ai_id = %payload.ai_id,
                %sender,
                "capability advertised on behalf of another peer"
            );
        }

        let id = payload.capability_id.clone();
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = match store.records.get(&id) {
            Some(existing) if existing.record.last_seen > seen_at => {
                debug!(capability = %id, message_id = %envelope.message_id, "ignoring out-of-date advertisement");
                return false;
            }
            Some(existing) => {
                if existing.record.advertiser_id != *sender {
                    warn!(
                        capability = %id,
                        previous = %existing.record.advertiser_id,
                        advertiser = %sender,
                        "capability re-advertised by a different peer"
                    );
                }
                existing.seq
            }
            None => {
                let seq = store.next_seq;
                store.next_seq += 1;
                info!(capability = %id, advertiser = %sender, name = %payload.name, "capability discovered");
                seq
            }
        };

        store.records.insert(
            id,
            Stored {
                record: CapabilityRecord {
                    advertiser_id: sender.clone(),
                    payload,
                    last_seen: seen_at,
                },
                seq,
            },
        );
        true
    }

    /// Non-stale capabilities matching `query`, in discovery order unless
    /// trust sorting was requested.
    #[must_use]
    pub fn find_capabilities(&self, query: &CapabilityQuery) -> Vec<CapabilityRecord> {
        self.find_capabilities_at(query, Utc::now())
    }

    /// [`Self::find_capabilities`] evaluated at `now`.
    #[must_use]
    pub fn find_capabilities_at(
        &self,
        query: &CapabilityQuery,
        now: DateTime<Utc>,
    ) -> Vec<CapabilityRecord> {
        let mut candidates: Vec<(u64, CapabilityRecord)> = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store
                .records
                .values()
                .filter(|stored| !stored.record.is_stale_at(now, self.config.staleness_threshold))
                .filter(|stored| query.matches(&stored.record.payload))
                .map(|stored| (stored.seq, stored.record.clone()))
                .collect()
        };
        candidates.sort_by_key(|(seq, _)| *seq);

        let mut scored: Vec<(f64, CapabilityRecord)> = candidates
            .into_iter()
            .map(|(_, record)| (self.trust.get_score(&record.advertiser_id), record))
            .filter(|(score, _)| query.min_trust_score.is_none_or(|min| *score >= min))
            .collect();

        if query.sort_by_trust {
            scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
        }
        scored.into_iter().map(|(_, record)| record).collect()
    }

    /// Looks up a capability by id. Stale records are never returned.
    #[must_use]
    pub fn get_capability_by_id(
        &self,
        id: &CapabilityId,
        exclude_unavailable: bool,
    ) -> Option<CapabilityRecord> {
        let now = Utc::now();
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .records
            .get(id)
            .map(|stored| &stored.record)
            .filter(|record| !record.is_stale_at(now, self.config.staleness_threshold))
            .filter(|record| {
                !exclude_unavailable || record.payload.availability_status.is_available()
            })
            .cloned()
    }

    /// Looks up a capability that must be fresh and available.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::CapabilityNotFound`],
    /// [`DiscoveryError::StaleCapability`] or
    /// [`DiscoveryError::CapabilityUnavailable`].
    pub fn require_capability(&self, id: &CapabilityId) -> DiscoveryResult<CapabilityRecord> {
        let now = Utc::now();
        let record = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.records.get(id).map(|stored| stored.record.clone())
        }
        .ok_or_else(|| DiscoveryError::CapabilityNotFound { id: id.clone() })?;

        if record.is_stale_at(now, self.config.staleness_threshold) {
            return Err(DiscoveryError::StaleCapability {
                id: id.clone(),
                last_seen: record.last_seen,
            });
        }
        let status = record.payload.availability_status;
        if !status.is_available() {
            return Err(DiscoveryError::CapabilityUnavailable {
                id: id.clone(),
                status,
            });
        }
        Ok(record)
    }

    /// Every record in discovery order, optionally without stale ones.
    #[must_use]
    pub fn get_all_capabilities(&self, exclude_stale: bool) -> Vec<CapabilityRecord> {
        let now = Utc::now();
        let mut records: Vec<(u64, CapabilityRecord)> = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store
                .records
                .values()
                .filter(|stored| {
                    !exclude_stale
                        || !stored.record.is_stale_at(now, self.config.staleness_threshold)
                })
                .map(|stored| (stored.seq, stored.record.clone()))
                .collect()
        };
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, record)| record).collect()
    }

    /// Deletes stale records and returns how many were removed.
    pub fn remove_stale_capabilities(&self) -> usize {
        self.remove_stale_capabilities_at(Utc::now())
    }

    /// [`Self::remove_stale_capabilities`] evaluated at `now`.
    ///
    /// A record refreshed between the scan and the delete is kept.
    pub fn remove_stale_capabilities_at(&self, now: DateTime<Utc>) -> usize {
        let snapshot: Vec<(CapabilityId, DateTime<Utc>)> = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store
                .records
                .iter()
                .map(|(id, stored)| (id.clone(), stored.record.last_seen))
                .collect()
        };

        let stale: Vec<(CapabilityId, DateTime<Utc>)> = snapshot
            .into_iter()
            .filter(|(_, seen)| is_older_than(*seen, now, self.config.staleness_threshold))
            .collect();
        if stale.is_empty() {
            return 0;
        }

        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for (id, seen) in stale {
            if store
                .records
                .get(&id)
                .is_some_and(|stored| stored.record.last_seen == seen)
            {
                store.records.remove(&id);
                removed += 1;
                debug!(capability = %id, last_seen = %seen, "pruned stale capability");
            }
        }
        drop(store);

        if removed > 0 {
            info!(removed, "stale capabilities pruned");
        }
        removed
    }

    /// Number of stored records, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    /// Returns `true` when nothing has been discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the periodic pruning task. Calling it again while running is a no-op.
    pub fn start_pruning(self: &Arc<Self>) {
        let mut pruner = self.pruner.lock().unwrap_or_else(PoisonError::into_inner);
        if pruner.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.shutdown.send_replace(false);
        let discovery = Arc::downgrade(self);
        let interval = self.config.prune_interval;
        let mut shutdown = self.shutdown.subscribe();
        *pruner = Some(tokio::spawn(async move {
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
                        let Some(discovery) = discovery.upgrade() else { break };
                        discovery.remove_stale_capabilities();
                    }
                }
            }
            debug!("capability pruning stopped");
        }));
    }

    /// Returns `true` while the pruning task runs.
    #[must_use]
    pub fn is_pruning(&self) -> bool {
        self.pruner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the pruning task and waits for it to exit.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let pruner = self
            .pruner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pruner {
            if let Err(err) = handle.await {
                warn!(%err, "capability pruning task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use hsp_primitives::AvailabilityStatus;

    use super::*;

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn advert(id: &str, owner: &str, name: &str, tags: &[&str]) -> CapabilityAdvertisement {
        let mut builder = CapabilityAdvertisement::builder(CapabilityId::new(id).unwrap(), peer(owner))
            .name(name)
            .unwrap()
            .version("1.0")
            .unwrap();
        for tag in tags {
            builder = builder.tag(*tag);
        }
        builder.build().unwrap()
    }

    fn discovery(trust: Arc<TrustManager>) -> ServiceDiscovery {
        ServiceDiscovery::new(DiscoveryConfig::default(), trust).unwrap()
    }

    fn process(sd: &ServiceDiscovery, payload: CapabilityAdvertisement, seen_at: DateTime<Utc>) -> bool {
        let sender = payload.ai_id.clone();
        let envelope = MessageEnvelope::capability_advertisement(sender.clone(), payload.clone());
        sd.process_capability_advertisement_at(payload, &sender, &envelope, seen_at)
    }

    #[test]
    fn rejects_zero_durations() {
        let config = DiscoveryConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(config.validate(), Err(DiscoveryError::InvalidConfig(_))));
        assert!(ServiceDiscovery::new(config, Arc::default()).is_err());
    }

    #[test]
    fn trust_threshold_and_sorting() {
        let trust = Arc::new(TrustManager::default());
        trust.update_score(&peer("did:hsp:a"), None, Some(0.8));
        trust.update_score(&peer("did:hsp:b"), None, Some(0.3));
        trust.update_score(&peer("did:hsp:c"), None, Some(0.95));
        let sd = discovery(Arc::clone(&trust));
        let now = Utc::now();

        process(&sd, advert("cap_b", "did:hsp:b", "CapB", &[]), now);
        process(&sd, advert("cap_a", "did:hsp:a", "CapA", &[]), now);
        process(&sd, advert("cap_c", "did:hsp:c", "CapC", &[]), now);

        let found = sd.find_capabilities(&CapabilityQuery::new().min_trust_score(0.6));
        let ids: Vec<_> = found.iter().map(|r| r.capability_id().as_str()).collect();
        assert_eq!(ids, ["cap_a", "cap_c"]);

        let sorted = sd.find_capabilities(&CapabilityQuery::new().sort_by_trust(true));
        let ids: Vec<_> = sorted.iter().map(|r| r.capability_id().as_str()).collect();
        assert_eq!(ids, ["cap_c", "cap_a", "cap_b"]);
    }

    #[test]
    fn equal_trust_keeps_discovery_order() {
        let sd = discovery(Arc::default());
        let now = Utc::now();
        for id in ["cap_3", "cap_1", "cap_2"] {
            process(&sd, advert(id, "did:hsp:same", id, &[]), now);
        }
        // Refreshing must not move a record to the back.
        process(&sd, advert("cap_3", "did:hsp:same", "cap_3", &[]), now + TimeDelta::seconds(1));

        let sorted = sd.find_capabilities(&CapabilityQuery::new().sort_by_trust(true));
        let ids: Vec<_> = sorted.iter().map(|r| r.capability_id().as_str()).collect();
        assert_eq!(ids, ["cap_3", "cap_1", "cap_2"]);
    }

    #[test]
    fn name_id_and_tag_filters() {
        let sd = discovery(Arc::default());
        let now = Utc::now();
        process(&sd, advert("cap_alpha", "did:hsp:a", "CapAlpha", &["nlp", "en"]), now);
        process(&sd, advert("cap_beta", "did:hsp:a", "CapBeta", &["nlp"]), now);

        let by_name = sd.find_capabilities(&CapabilityQuery::new().name("CapAlpha"));
        assert_eq!(by_name.len(), 1);
        assert!(sd.find_capabilities(&CapabilityQuery::new().name("Cap")).is_empty());

        let by_id = sd.find_capabilities(
            &CapabilityQuery::new().capability_id(CapabilityId::new("cap_beta").unwrap()),
        );
        assert_eq!(by_id[0].payload.name, "CapBeta");

        let both_tags = sd.find_capabilities(&CapabilityQuery::new().tag("nlp").tag("en"));
        assert_eq!(both_tags.len(), 1);
        assert_eq!(both_tags[0].capability_id().as_str(), "cap_alpha");
        assert_eq!(sd.find_capabilities(&CapabilityQuery::new().tag("nlp")).len(), 2);
    }

    #[test]
    fn unavailable_capabilities_are_hidden_by_default() {
        let sd = discovery(Arc::default());
        let mut offline = advert("cap_off", "did:hsp:a", "Off", &[]);
        offline.availability_status = AvailabilityStatus::Offline;
        process(&sd, offline, Utc::now());

        assert!(sd.find_capabilities(&CapabilityQuery::new()).is_empty());
        assert_eq!(
            sd.find_capabilities(&CapabilityQuery::new().include_unavailable(true)).len(),
            1
        );
        let id = CapabilityId::new("cap_off").unwrap();
        assert!(sd.get_capability_by_id(&id, true).is_none());
        assert!(sd.get_capability_by_id(&id, false).is_some());
        assert!(matches!(
            sd.require_capability(&id),
            Err(DiscoveryError::CapabilityUnavailable { status: AvailabilityStatus::Offline, .. })
        ));
    }

    #[test]
    fn stale_records_are_invisible_and_pruned() {
        let sd = discovery(Arc::default());
        let now = Utc::now();
        process(&sd, advert("cap_old", "did:hsp:a", "Old", &[]), now - TimeDelta::hours(25));
        process(&sd, advert("cap_new", "did:hsp:a", "New", &[]), now);

        let id = CapabilityId::new("cap_old").unwrap();
        assert!(sd.get_capability_by_id(&id, false).is_none());
        assert!(matches!(
            sd.require_capability(&id),
            Err(DiscoveryError::StaleCapability { .. })
        ));
        assert_eq!(sd.find_capabilities(&CapabilityQuery::new()).len(), 1);
        assert_eq!(sd.get_all_capabilities(false).len(), 2);
        assert_eq!(sd.get_all_capabilities(true).len(), 1);

        assert_eq!(sd.remove_stale_capabilities(), 1);
        assert_eq!(sd.len(), 1);
        assert!(matches!(
            sd.require_capability(&id),
            Err(DiscoveryError::CapabilityNotFound { .. })
        ));
    }

    #[test]
    fn later_advertisement_replaces_record() {
        let sd = discovery(Arc::default());
        let now = Utc::now();
        process(&sd, advert("cap", "did:hsp:a", "First", &[]), now);
        assert!(process(&sd, advert("cap", "did:hsp:b", "Second", &[]), now + TimeDelta::seconds(5)));
        assert!(!process(&sd, advert("cap", "did:hsp:a", "Replay", &[]), now));

        let record = sd.require_capability(&CapabilityId::new("cap").unwrap()).unwrap();
        assert_eq!(record.payload.name, "Second");
        assert_eq!(record.advertiser_id.as_str(), "did:hsp:b");
        assert_eq!(sd.len(), 1);
    }

    #[test]
    fn refreshed_record_survives_prune_window() {
        let sd = discovery(Arc::default());
        let old = Utc::now() - TimeDelta::hours(30);
        process(&sd, advert("cap", "did:hsp:a", "Cap", &[]), old);
        process(&sd, advert("cap", "did:hsp:a", "Cap", &[]), Utc::now());
        assert_eq!(sd.remove_stale_capabilities(), 0);
        assert_eq!(sd.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pruning_task_runs_on_interval() {
        let config = DiscoveryConfig::new(Duration::from_secs(60 * 60), Duration::from_secs(60));
        let sd = Arc::new(ServiceDiscovery::new(config, Arc::default()).unwrap());
        process(&sd, advert("cap", "did:hsp:a", "Cap", &[]), Utc::now() - TimeDelta::hours(2));

        sd.start_pruning();
        assert!(sd.is_pruning());
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(sd.is_empty());

        sd.stop().await;
        assert!(!sd.is_pruning());
    }
}
