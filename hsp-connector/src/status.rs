use hsp_fallback::FallbackStatus;
use serde::Serialize;

use crate::ConnectionState;

/// How an outbound envelope was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Delivery {
    /// Published on the transport; no acknowledgement was requested.
    Transport,
    /// Published on the transport and acknowledged by the recipient.
    Acknowledged {
        /// Publish attempts before the acknowledgement arrived.
        attempts: u32,
    },
    /// Delivered by a fallback protocol.
    Fallback {
        /// Protocol that delivered.
        protocol: String,
    },
}

/// Snapshot returned by `communication_status`.
#[derive(Debug, Clone, Serialize)]
pub struct CommunicationStatus {
    /// Primary transport considered usable.
    pub hsp_available: bool,
    /// Transport reports an open connection.
    pub is_connected: bool,
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Fallback delivery enabled in configuration.
    pub fallback_enabled: bool,
    /// Fallback manager initialized.
    pub fallback_initialized: bool,
    /// Acknowledgements currently awaited.
    pub pending_acks: usize,
    /// Fallback manager report, when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackStatus>,
}

/// Result of `health_check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Primary transport connected and usable.
    pub hsp_healthy: bool,
    /// Active fallback protocol passes its health check.
    pub fallback_healthy: bool,
    /// At least one delivery path is healthy.
    pub overall_healthy: bool,
}
