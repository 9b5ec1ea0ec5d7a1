use std::time::Duration;

use hsp_bus::{BusError, TransportError};
use thiserror::Error;

use crate::{LifecycleError, SchedulerError};

/// Result alias for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors surfaced by [`HspConnector`](crate::HspConnector).
///
/// The boolean-returning API (`publish_message`, `send_task_request`, ...)
/// folds these into `false`/`None`; the `try_*` forms expose them.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration was invalid.
    #[error("invalid connector configuration: {0}")]
    InvalidConfig(&'static str),
    /// Connector was shut down.
    #[error("connector is closed")]
    Closed,
    /// Transport rejected an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Envelope could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] hsp_primitives::Error),
    /// No acknowledgement arrived before a caller-imposed deadline.
    #[error("no acknowledgement for `{correlation_id}` within {waited:?}")]
    AckTimeout {
        /// Key the acknowledgement was awaited under.
        correlation_id: String,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Every publish attempt went unacknowledged and no fallback delivered the message.
    #[error("`{correlation_id}` unacknowledged after {attempts} attempts")]
    RetriesExhausted {
        /// Key the acknowledgement was awaited under.
        correlation_id: String,
        /// Publish attempts made.
        attempts: u32,
    },
    /// The transport failed and no fallback protocol delivered the message.
    #[error("fallback delivery unavailable: {reason}")]
    FallbackUnavailable {
        /// Human-readable context.
        reason: String,
    },
    /// The wait was abandoned because the connector disconnected.
    #[error("acknowledgement wait for `{correlation_id}` cancelled")]
    Cancelled {
        /// Key the acknowledgement was awaited under.
        correlation_id: String,
    },
    /// An acknowledgement is already awaited under the same key.
    #[error("an acknowledgement for `{correlation_id}` is already pending")]
    DuplicatePending {
        /// Key the acknowledgement was awaited under.
        correlation_id: String,
    },
    /// Lifecycle rejected a transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// Dispatch scheduler rejected work.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ConnectorError {
    /// Convenience constructor for [`ConnectorError::FallbackUnavailable`].
    #[must_use]
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self::FallbackUnavailable {
            reason: reason.into(),
        }
    }
}

impl From<BusError> for ConnectorError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Transport(err) => Self::Transport(err),
            BusError::Codec(err) => Self::Codec(err),
        }
    }
}
