//! In-process publish/subscribe fan-out.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, trace};

/// Handler registered on an [`InternalBus`] channel.
pub type BusHandler<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Identifies a subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Channel-keyed subscriber map with ordered, synchronous fan-out.
pub struct InternalBus<M> {
    channels: RwLock<HashMap<String, Vec<(SubscriptionId, BusHandler<M>)>>>,
    next_id: AtomicU64,
}

impl<M> Default for InternalBus<M> {
    fn default() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<M> fmt::Debug for InternalBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = channels
            .iter()
            .map(|(name, subs)| (name.as_str(), subs.len()))
            .collect();
        f.debug_struct("InternalBus").field("channels", &counts).finish()
    }
}

impl<M> InternalBus<M> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` to the end of `channel`'s subscriber list.
    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription. Returns `false` if it was not present.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = channels.get_mut(channel) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Invokes every subscriber of `channel` in subscription order.
    ///
    /// A panicking subscriber is logged and does not prevent later subscribers
    /// from running. Returns the number of subscribers invoked.
    pub fn publish(&self, channel: &str, message: &M) -> usize {
        let subscribers: Vec<BusHandler<M>> = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            channels
                .get(channel)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        trace!(channel, subscribers = subscribers.len(), "internal bus publish");
        for handler in &subscribers {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!(channel, "internal bus subscriber panicked");
            }
        }
        subscribers.len()
    }

    /// Number of subscribers currently attached to `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn fan_out_preserves_subscription_order() {
        let bus = InternalBus::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe("numbers", move |n: &u32| log.lock().unwrap().push((tag, *n)));
        }

        assert_eq!(bus.publish("numbers", &7), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let bus = InternalBus::<()>::new();
        let hits = Arc::new(AtomicU64::new(0));
        bus.subscribe("c", |()| panic!("subscriber failure"));
        let counter = Arc::clone(&hits);
        bus.subscribe("c", move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish("c", &()), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_target() {
        let bus = InternalBus::<()>::new();
        let a = bus.subscribe("c", |()| {});
        let _b = bus.subscribe("c", |()| {});

        assert!(bus.unsubscribe("c", a));
        assert!(!bus.unsubscribe("c", a));
        assert_eq!(bus.subscriber_count("c"), 1);
        assert_eq!(bus.publish("empty", &()), 0);
    }
}
