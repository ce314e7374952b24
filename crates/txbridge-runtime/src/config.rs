//! Environment-backed configuration for the bridge runtime.

use std::{env, error::Error, fmt, time::Duration};

use txbridge_core::{HandshakeTiming, RetryPolicy};
use txbridge_store::StoreLimits;

const DEFAULT_VERDICT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;
const DEFAULT_TREE_MAX_RETRIES: u32 = 25;
const DEFAULT_DOCUMENT_MAX_ATTEMPTS: u32 = 5;
const DOCUMENT_RETRY_BASE_DELAY_MS: u64 = 10;
const DOCUMENT_RETRY_MAX_DELAY_MS: u64 = 1_000;

/// Runtime tuning shared by the coordinators and in-memory stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Handshake deadline per pause point.
    pub verdict_timeout_ms: u64,
    /// Handshake polling slice.
    pub poll_interval_ms: u64,
    pub command_buffer: usize,
    pub event_buffer: usize,
    /// Attempt cap of the in-memory tree store.
    pub tree_max_retries: u32,
    /// Attempt cap of the in-memory document store.
    pub document_max_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            verdict_timeout_ms: DEFAULT_VERDICT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
            tree_max_retries: DEFAULT_TREE_MAX_RETRIES,
            document_max_attempts: DEFAULT_DOCUMENT_MAX_ATTEMPTS,
        }
    }
}

impl BridgeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let verdict_timeout_ms = parse_positive(
            "TXBRIDGE_VERDICT_TIMEOUT_MS",
            DEFAULT_VERDICT_TIMEOUT_MS,
            &mut lookup,
        )?;
        let poll_interval_ms = parse_positive(
            "TXBRIDGE_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            &mut lookup,
        )?;
        let command_buffer = parse_positive(
            "TXBRIDGE_COMMAND_BUFFER",
            DEFAULT_COMMAND_BUFFER,
            &mut lookup,
        )?;
        let event_buffer =
            parse_positive("TXBRIDGE_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;
        let tree_max_retries = parse_positive(
            "TXBRIDGE_TREE_MAX_RETRIES",
            DEFAULT_TREE_MAX_RETRIES,
            &mut lookup,
        )?;
        let document_max_attempts = parse_positive(
            "TXBRIDGE_DOCUMENT_MAX_ATTEMPTS",
            DEFAULT_DOCUMENT_MAX_ATTEMPTS,
            &mut lookup,
        )?;

        if poll_interval_ms > verdict_timeout_ms {
            return Err(ConfigError::InvalidValue {
                key: "TXBRIDGE_POLL_INTERVAL_MS",
                value: poll_interval_ms.to_string(),
                reason: format!("must not exceed the verdict timeout ({verdict_timeout_ms} ms)"),
            });
        }

        Ok(Self {
            verdict_timeout_ms,
            poll_interval_ms,
            command_buffer,
            event_buffer,
            tree_max_retries,
            document_max_attempts,
        })
    }

    pub fn handshake_timing(&self) -> HandshakeTiming {
        HandshakeTiming::new(
            Duration::from_millis(self.verdict_timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            tree_max_retries: self.tree_max_retries,
            document_retry: RetryPolicy::new(
                DOCUMENT_RETRY_BASE_DELAY_MS,
                DOCUMENT_RETRY_MAX_DELAY_MS,
                self.document_max_attempts,
            ),
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_positive<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(default);
    }

    let parsed = value
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: err.to_string(),
        })?;
    if parsed < T::from(1) {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<BridgeConfig, ConfigError> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        BridgeConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn uses_defaults_when_unset() {
        let config = from_pairs(&[]).expect("defaults should parse");
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(
            config.handshake_timing(),
            HandshakeTiming::new(Duration::from_secs(5), Duration::from_millis(250))
        );
        assert_eq!(config.store_limits().document_retry.max_attempts(), 5);
    }

    #[test]
    fn parses_overrides() {
        let config = from_pairs(&[
            ("TXBRIDGE_VERDICT_TIMEOUT_MS", " 800 "),
            ("TXBRIDGE_POLL_INTERVAL_MS", "20"),
            ("TXBRIDGE_TREE_MAX_RETRIES", "3"),
            ("TXBRIDGE_EVENT_BUFFER", ""),
        ])
        .expect("overrides should parse");

        assert_eq!(config.verdict_timeout_ms, 800);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.store_limits().tree_max_retries, 3);
        assert_eq!(config.event_buffer, 512);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = from_pairs(&[("TXBRIDGE_COMMAND_BUFFER", "0")]).expect_err("zero is invalid");
        assert_eq!(
            err.to_string(),
            "invalid TXBRIDGE_COMMAND_BUFFER='0': must be at least 1"
        );

        let err = from_pairs(&[("TXBRIDGE_VERDICT_TIMEOUT_MS", "soon")])
            .expect_err("garbage is invalid");
        match err {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "TXBRIDGE_VERDICT_TIMEOUT_MS")
            }
        }
    }

    #[test]
    fn rejects_poll_interval_above_timeout() {
        let err = from_pairs(&[
            ("TXBRIDGE_VERDICT_TIMEOUT_MS", "100"),
            ("TXBRIDGE_POLL_INTERVAL_MS", "200"),
        ])
        .expect_err("poll interval above timeout is invalid");
        assert!(err.to_string().contains("TXBRIDGE_POLL_INTERVAL_MS"));
    }
}
