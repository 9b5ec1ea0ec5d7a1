//! Pending acknowledgement bookkeeping.
//!
//! Each ack-required publish registers one entry keyed by the envelope's
//! ack key. The entry is removed only when its [`PendingGuard`] drops, so
//! every terminal outcome (acknowledged, exhausted, cancelled, or the
//! publishing future being dropped) removes it exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;

use crate::{ConnectorError, ConnectorResult};

/// Outcome delivered to the task waiting on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckSignal {
    Acknowledged,
    Cancelled,
}

#[derive(Debug)]
struct PendingAck {
    topic: String,
    retries_left: u32,
    created_at: Instant,
    notify: Option<oneshot::Sender<AckSignal>>,
}

#[derive(Debug, Default)]
pub(crate) struct PendingAcks {
    entries: Mutex<HashMap<String, PendingAck>>,
}

impl PendingAcks {
    pub(crate) fn register(
        self: &Arc<Self>,
        key: &str,
        topic: &str,
        retries_left: u32,
    ) -> ConnectorResult<(PendingGuard, oneshot::Receiver<AckSignal>)> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(key) {
            return Err(ConnectorError::DuplicatePending {
                correlation_id: key.to_owned(),
            });
        }
        let (notify, wait) = oneshot::channel();
        entries.insert(
            key.to_owned(),
            PendingAck {
                topic: topic.to_owned(),
                retries_left,
                created_at: Instant::now(),
                notify: Some(notify),
            },
        );
        drop(entries);

        let guard = PendingGuard {
            acks: Arc::clone(self),
            key: key.to_owned(),
        };
        Ok((guard, wait))
    }

    pub(crate) fn set_retries_left(&self, key: &str, retries_left: u32) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            entry.retries_left = retries_left;
        }
    }

    /// Signals the waiter for `key`. Returns `false` for unknown or already
    /// resolved keys.
    pub(crate) fn resolve(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(notify) = entries.get_mut(key).and_then(|entry| entry.notify.take()) else {
            return false;
        };
        drop(entries);
        notify.send(AckSignal::Acknowledged).is_ok()
    }

    /// Wakes every waiter with [`AckSignal::Cancelled`].
    pub(crate) fn cancel_all(&self) -> usize {
        let waiters: Vec<_> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .filter_map(|(key, entry)| {
                debug!(
                    correlation_id = %key,
                    topic = %entry.topic,
                    retries_left = entry.retries_left,
                    "cancelling acknowledgement wait"
                );
                entry.notify.take()
            })
            .collect();
        waiters
            .into_iter()
            .map(|notify| notify.send(AckSignal::Cancelled))
            .filter(Result::is_ok)
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, key: &str) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(entry) = removed {
            debug!(
                correlation_id = %key,
                topic = %entry.topic,
                elapsed_ms = u64::try_from(entry.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                "pending acknowledgement removed"
            );
        }
    }
}

/// Removes its entry from [`PendingAcks`] on drop.
#[derive(Debug)]
pub(crate) struct PendingGuard {
    acks: Arc<PendingAcks>,
    key: String,
}

impl PendingGuard {
    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.acks.remove(&self.key);
    }
}
