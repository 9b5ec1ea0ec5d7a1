//! Tracing subscriber installation for HSP processes.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result};
use hsp_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Builds the filter: `RUST_LOG` when set, else the configured directive.
///
/// # Errors
///
/// Fails when the configured directive does not parse.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(from_env.as_deref(), config)
}

/// Builds the filter from an explicit override, falling back to the
/// configured directive when the override is absent or malformed.
///
/// # Errors
///
/// Fails when the fallback directive does not parse.
pub fn filter_from(override_directive: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter> {
    if let Some(filter) = override_directive.and_then(|raw| EnvFilter::try_new(raw).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.directive)
        .with_context(|| format!("invalid log directive {:?}", config.directive))
}

/// Installs a global `fmt` subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed, so
/// repeated calls (tests, embedded use) are harmless.
///
/// # Errors
///
/// Fails when the log directive does not parse.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> LoggingConfig {
        LoggingConfig {
            directive: "hsp_connector=loud".to_owned(),
            format: LogFormat::Compact,
        }
    }

    #[test]
    fn rejects_malformed_directive() {
        let err = filter_from(None, &loud()).unwrap_err();
        assert!(err.to_string().contains("hsp_connector=loud"));
    }

    #[test]
    fn override_takes_precedence_over_config() {
        let filter = filter_from(Some("hsp_bus=trace"), &loud()).unwrap();
        assert_eq!(filter.to_string(), "hsp_bus=trace");
    }

    #[test]
    fn malformed_override_falls_back_to_config() {
        let config = LoggingConfig {
            directive: "info".to_owned(),
            format: LogFormat::Pretty,
        };
        let filter = filter_from(Some("hsp_bus=loud"), &config).unwrap();
        assert_eq!(filter.to_string(), "info");
        assert!(filter_from(Some("hsp_bus=loud"), &loud()).is_err());
    }

    #[test]
    fn second_install_is_reported_not_failed() {
        let config = LoggingConfig::default();
        init(&config).unwrap();
        assert!(!init(&config).unwrap());
    }
}
