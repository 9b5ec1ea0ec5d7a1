//! Typed callback registries for inbound envelopes.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use hsp_primitives::{MessageEnvelope, PeerId};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors a callback may report. They are logged and never stop dispatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackError {
    /// The callback does not handle this payload.
    #[error("payload rejected: {0}")]
    Rejected(String),
    /// Custom error with human-readable context.
    #[error("callback error: {0}")]
    Custom(String),
}

impl CallbackError {
    /// Creates a custom error variant from a string-like value.
    #[must_use]
    pub fn custom(reason: impl Into<String>) -> Self {
        Self::Custom(reason.into())
    }
}

/// Result returned by inbound callbacks.
pub type CallbackResult = Result<(), CallbackError>;

/// Callback receiving a typed payload, the transport-level sender and the envelope.
pub type Callback<P> =
    Arc<dyn Fn(P, PeerId, Arc<MessageEnvelope>) -> BoxFuture<'static, CallbackResult> + Send + Sync>;

/// Callback run after connecting or disconnecting.
pub type LifecycleCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Ordered list of callbacks for one payload type.
pub(crate) struct CallbackRegistry<P> {
    kind: &'static str,
    callbacks: RwLock<Vec<Callback<P>>>,
}

impl<P> fmt::Debug for CallbackRegistry<P>
where
    P: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("kind", &self.kind)
            .field("callbacks", &self.len())
            .finish()
    }
}

impl<P> CallbackRegistry<P>
where
    P: Clone + Send + 'static,
{
    pub(crate) const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register<F, Fut>(&self, callback: F)
    where
        F: Fn(P, PeerId, Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let callback: Callback<P> =
            Arc::new(move |payload, sender, envelope| callback(payload, sender, envelope).boxed());
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs every callback in registration order and returns how many succeeded.
    ///
    /// Errors and panics are logged per callback.
    pub(crate) async fn run(&self, payload: &P, sender: &PeerId, envelope: &Arc<MessageEnvelope>) -> usize {
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut succeeded = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            let call = async {
                callback(payload.clone(), sender.clone(), Arc::clone(envelope)).await
            };
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(err)) => warn!(
                    kind = self.kind,
                    index,
                    message_id = %envelope.message_id,
                    %err,
                    "callback failed"
                ),
                Err(_) => warn!(
                    kind = self.kind,
                    index,
                    message_id = %envelope.message_id,
                    "callback panicked"
                ),
            }
        }
        debug!(kind = self.kind, succeeded, total = callbacks.len(), "callbacks run");
        succeeded
    }
}

/// Ordered list of connect/disconnect callbacks.
pub(crate) struct LifecycleCallbacks {
    kind: &'static str,
    callbacks: RwLock<Vec<LifecycleCallback>>,
}

impl fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl LifecycleCallbacks {
    pub(crate) const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: LifecycleCallback = Arc::new(move || callback().boxed());
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub(crate) async fn run(&self) {
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            if AssertUnwindSafe(async { callback().await })
                .catch_unwind()
                .await
                .is_err()
            {
                warn!(kind = self.kind, "lifecycle callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hsp_primitives::{FactPayload, Payload};

    use super::*;

    fn envelope() -> Arc<MessageEnvelope> {
        let sender = PeerId::new("did:hsp:a").unwrap();
        let fact = FactPayload::natural_language(sender.clone(), "sky is blue", 0.9);
        Arc::new(MessageEnvelope::fact(sender, fact))
    }

    fn fact(envelope: &MessageEnvelope) -> FactPayload {
        match &envelope.payload {
            Payload::Fact(fact) => fact.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn runs_in_order_and_isolates_failures() {
        let registry = CallbackRegistry::<FactPayload>::new("fact");
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&order);
        registry.register(move |_, _, _| {
            seen.lock().unwrap().push(1);
            async { Err(CallbackError::custom("first fails")) }
        });
        registry.register(|_, _, _| async {
            let explode = true;
            if explode {
                panic!("second panics");
            }
            Ok(())
        });
        let seen = Arc::clone(&order);
        registry.register(move |payload: FactPayload, _, _| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(payload.statement_nl.as_deref(), Some("sky is blue"));
                seen.lock().unwrap().push(3);
                Ok(())
            }
        });

        let envelope = envelope();
        let payload = fact(&envelope);
        let succeeded = registry.run(&payload, &envelope.sender_ai_id, &envelope).await;

        assert_eq!(succeeded, 1);
        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn lifecycle_callbacks_survive_panics() {
        let callbacks = LifecycleCallbacks::new("connect");
        let hits = Arc::new(Mutex::new(0));
        callbacks.register(|| async {
            let explode = true;
            if explode {
                panic!("boom");
            }
        });
        let counter = Arc::clone(&hits);
        callbacks.register(move || {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
            }
        });

        callbacks.run().await;
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
