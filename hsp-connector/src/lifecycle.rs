//! Connection state machine for a connector.

use hsp_primitives::PeerId;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// States a connector moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport connection.
    Disconnected,
    /// Connection attempts in progress.
    Connecting,
    /// Transport connected and the last publish succeeded.
    Connected,
    /// Transport unusable; messaging relies on fallback protocols.
    Degraded,
    /// Connector shut down; no further work is accepted.
    Closed,
}

impl ConnectionState {
    /// Returns `true` when the primary transport is considered usable.
    #[must_use]
    pub const fn is_hsp_available(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` once the connector is closed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Events that drive [`ConnectionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// `connect()` started.
    Connect,
    /// Transport connected, or a publish succeeded again.
    Established,
    /// Connecting failed or a publish was rejected.
    TransportLost,
    /// `disconnect()` called.
    Disconnect,
    /// Connector shut down.
    Close,
}

/// Connection lifecycle of one connector.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    ai_id: PeerId,
    state: ConnectionState,
}

impl Lifecycle {
    /// Starts in [`ConnectionState::Disconnected`].
    #[must_use]
    pub const fn new(ai_id: PeerId) -> Self {
        Self {
            ai_id,
            state: ConnectionState::Disconnected,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies an event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: ConnectionEvent) -> LifecycleResult<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self.state, event) {
            (S::Disconnected | S::Degraded | S::Connecting, E::Connect) => Some(S::Connecting),
            (S::Connected, E::Connect) => Some(S::Connected),
            (S::Connecting | S::Connected | S::Degraded, E::Established) => Some(S::Connected),
            (S::Connecting | S::Connected | S::Degraded, E::TransportLost) => Some(S::Degraded),
            (S::Disconnected, E::TransportLost) => Some(S::Disconnected),
            (_, E::Close) => Some(S::Closed),
            (S::Closed, _) => None,
            (_, E::Disconnect) => Some(S::Disconnected),
            (S::Disconnected, E::Established) => None,
        };

        let Some(next_state) = next else {
            return Err(LifecycleError::InvalidTransition {
                ai_id: self.ai_id.clone(),
                from: self.state,
                event,
            });
        };

        if next_state != self.state {
            debug!(
                ai_id = %self.ai_id,
                from = ?self.state,
                to = ?next_state,
                ?event,
                "connection state transition"
            );
            self.state = next_state;
        }
        Ok(self.state)
    }
}

/// Errors emitted by the lifecycle controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid connection transition from {from:?} via {event:?} for {ai_id}")]
    InvalidTransition {
        /// Connector identity.
        ai_id: PeerId,
        /// State prior to the attempted transition.
        from: ConnectionState,
        /// Event that was rejected.
        event: ConnectionEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(PeerId::new("did:hsp:test").unwrap())
    }

    #[test]
    fn connect_flow() {
        let mut lifecycle = lifecycle();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        lifecycle.transition(ConnectionEvent::Connect).unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
        lifecycle.transition(ConnectionEvent::Established).unwrap();
        assert!(lifecycle.state().is_hsp_available());
    }

    #[test]
    fn publish_failure_degrades_and_recovers() {
        let mut lifecycle = lifecycle();
        lifecycle.transition(ConnectionEvent::Connect).unwrap();
        lifecycle.transition(ConnectionEvent::Established).unwrap();
        lifecycle.transition(ConnectionEvent::TransportLost).unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Degraded);
        lifecycle.transition(ConnectionEvent::Established).unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
        lifecycle.transition(ConnectionEvent::Disconnect).unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn closed_is_terminal() {
        let mut lifecycle = lifecycle();
        lifecycle.transition(ConnectionEvent::Close).unwrap();
        assert!(lifecycle.state().is_terminal());
        lifecycle.transition(ConnectionEvent::Close).unwrap();

        let err = lifecycle
            .transition(ConnectionEvent::Connect)
            .expect_err("connect after close should fail");
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: ConnectionState::Closed, .. }
        ));
    }

    #[test]
    fn cannot_establish_without_connecting() {
        let mut lifecycle = lifecycle();
        assert!(lifecycle.transition(ConnectionEvent::Established).is_err());
    }
}
