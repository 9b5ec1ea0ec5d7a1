//! Loading from JSON files and applying environment overrides.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::debug;

use crate::HspConfig;

/// Environment variables recognised by [`HspConfig::apply_env`].
pub const ENV_KEYS: [&str; 8] = [
    "HSP_AI_ID",
    "HSP_BROKER_ADDRESS",
    "HSP_BROKER_PORT",
    "HSP_ACK_TIMEOUT_SECS",
    "HSP_MAX_ACK_RETRIES",
    "HSP_ENABLE_FALLBACK",
    "HSP_FALLBACK_BASE_PATH",
    "HSP_LOG",
];

impl HspConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an invalid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing HSP configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, parsed or validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        let config = Self::from_json(&raw)
            .with_context(|| format!("loading configuration file {}", path.display()))?;
        debug!(path = %path.display(), ai_id = %config.ai_id, "configuration loaded");
        Ok(config)
    }

    /// Applies `HSP_*` overrides from `vars`, then validates.
    ///
    /// Pass `std::env::vars()` in production; tests pass explicit pairs.
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Fails when a value cannot be parsed or the result is invalid.
    pub fn apply_env<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            if !ENV_KEYS.contains(&key) {
                continue;
            }
            let value: String = value.into();
            match key {
                "HSP_AI_ID" => self.ai_id = value,
                "HSP_BROKER_ADDRESS" => self.broker.address = value,
                "HSP_BROKER_PORT" => self.broker.port = parse(key, &value)?,
                "HSP_ACK_TIMEOUT_SECS" => self.connector.ack_timeout_secs = parse(key, &value)?,
                "HSP_MAX_ACK_RETRIES" => self.connector.max_ack_retries = parse(key, &value)?,
                "HSP_ENABLE_FALLBACK" => self.fallback.enabled = parse_flag(key, &value)?,
                "HSP_FALLBACK_BASE_PATH" => self.fallback.file.base_path = value.into(),
                "HSP_LOG" => self.logging.directive = value,
                _ => continue,
            }
            debug!(key, "configuration override applied");
        }
        self.validate()?;
        Ok(self)
    }

    /// Loads `path` when given (defaults otherwise) and applies the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_path`] and [`Self::apply_env`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        base.apply_env(std::env::vars())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("invalid value for {key}: {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::*;
    use crate::LogFormat;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = HspConfig::from_json(
            r#"{"ai_id": "did:hsp:alpha", "connector": {"max_ack_retries": 5}, "logging": {"format": "pretty"}}"#,
        )
        .unwrap();

        assert_eq!(config.ai_id, "did:hsp:alpha");
        assert_eq!(config.connector.max_ack_retries, 5);
        assert_eq!(config.connector.ack_timeout_secs, 10);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.fallback.enabled);
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let config = HspConfig::default()
            .apply_env([
                ("HSP_AI_ID", "did:hsp:beta"),
                ("HSP_BROKER_PORT", "8883"),
                ("HSP_ACK_TIMEOUT_SECS", "2"),
                ("HSP_ENABLE_FALLBACK", "off"),
                ("HSP_FALLBACK_BASE_PATH", "/tmp/hsp-test"),
                ("HSP_LOG", "debug"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();

        assert_eq!(config.ai_id, "did:hsp:beta");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.connector.ack_timeout_secs, 2);
        assert!(!config.fallback.enabled);
        assert_eq!(config.fallback.file.base_path, PathBuf::from("/tmp/hsp-test"));
        assert_eq!(config.logging.directive, "debug");
    }

    #[test]
    fn rejects_bad_overrides_and_values() {
        let err = HspConfig::default()
            .apply_env([("HSP_BROKER_PORT", "not-a-port")])
            .unwrap_err();
        assert!(err.to_string().contains("HSP_BROKER_PORT"));

        assert!(HspConfig::default().apply_env([("HSP_ACK_TIMEOUT_SECS", "0")]).is_err());
        assert!(HspConfig::default().apply_env([("HSP_AI_ID", " ")]).is_err());
        assert!(HspConfig::from_json(r#"{"discovery": {"default_trust_score": 1.5}}"#).is_err());
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("hsp-config-{}.json", Uuid::new_v4()));
        fs::write(&path, r#"{"ai_id": "did:hsp:file", "broker": {"port": 1884}}"#).unwrap();

        let config = HspConfig::from_path(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.ai_id, "did:hsp:file");
        assert_eq!(config.broker.port, 1884);
        assert!(HspConfig::from_path(&path).is_err());
    }
}
