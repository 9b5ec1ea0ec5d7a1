use std::time::Duration;

use crate::{ConnectorError, ConnectorResult};

/// Wait for an acknowledgement before re-publishing.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Re-publishes after the first attempt.
pub const DEFAULT_MAX_ACK_RETRIES: u32 = 3;
/// Transport connect attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Delay before the second connect attempt; doubled per attempt.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Connector tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    ack_timeout: Duration,
    max_ack_retries: u32,
    connect_attempts: u32,
    connect_backoff: Duration,
    enable_fallback: bool,
    default_qos: u8,
    task_request_deadline: Option<Duration>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_ack_retries: DEFAULT_MAX_ACK_RETRIES,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
            enable_fallback: true,
            default_qos: 1,
            task_request_deadline: None,
        }
    }
}

impl ConnectorConfig {
    /// Sets how long each publish attempt waits for its acknowledgement.
    #[must_use]
    pub const fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets how many times an unacknowledged message is re-published.
    #[must_use]
    pub const fn with_max_ack_retries(mut self, retries: u32) -> Self {
        self.max_ack_retries = retries;
        self
    }

    /// Sets the connect attempt count and initial backoff.
    #[must_use]
    pub const fn with_connect_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.connect_attempts = attempts;
        self.connect_backoff = backoff;
        self
    }

    /// Enables or disables fallback delivery.
    #[must_use]
    pub const fn with_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    /// Sets the transport QoS level used for publishes.
    #[must_use]
    pub const fn with_default_qos(mut self, qos: u8) -> Self {
        self.default_qos = qos;
        self
    }

    /// Bounds the total time `send_task_request` waits for its acknowledgement.
    #[must_use]
    pub const fn with_task_request_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.task_request_deadline = deadline;
        self
    }

    /// Per-attempt acknowledgement wait.
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Re-publishes after the first attempt.
    #[must_use]
    pub const fn max_ack_retries(&self) -> u32 {
        self.max_ack_retries
    }

    /// Transport connect attempts.
    #[must_use]
    pub const fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Initial connect backoff.
    #[must_use]
    pub const fn connect_backoff(&self) -> Duration {
        self.connect_backoff
    }

    /// Whether fallback delivery is enabled.
    #[must_use]
    pub const fn fallback_enabled(&self) -> bool {
        self.enable_fallback
    }

    /// Transport QoS level.
    #[must_use]
    pub const fn default_qos(&self) -> u8 {
        self.default_qos
    }

    /// Overall deadline for task request acknowledgement.
    #[must_use]
    pub const fn task_request_deadline(&self) -> Option<Duration> {
        self.task_request_deadline
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidConfig`] for zero timeouts, zero
    /// connect attempts or a QoS level above 2.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.ack_timeout.is_zero() {
            return Err(ConnectorError::InvalidConfig(
                "ack timeout must be greater than zero",
            ));
        }
        if self.connect_attempts == 0 {
            return Err(ConnectorError::InvalidConfig(
                "connect attempts must be at least one",
            ));
        }
        if self.default_qos > 2 {
            return Err(ConnectorError::InvalidConfig("qos must be 0, 1 or 2"));
        }
        if self.task_request_deadline.is_some_and(|deadline| deadline.is_zero()) {
            return Err(ConnectorError::InvalidConfig(
                "task request deadline must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConnectorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ack_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_ack_retries(), 3);
        assert!(config.fallback_enabled());
    }

    #[test]
    fn rejects_bad_values() {
        let zero_timeout = ConnectorConfig::default().with_ack_timeout(Duration::ZERO);
        assert!(matches!(zero_timeout.validate(), Err(ConnectorError::InvalidConfig(_))));

        let no_attempts = ConnectorConfig::default().with_connect_retry(0, Duration::ZERO);
        assert!(no_attempts.validate().is_err());

        assert!(ConnectorConfig::default().with_default_qos(3).validate().is_err());
    }
}
