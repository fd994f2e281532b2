// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction layer configuration
//!
//! Read once at process start. Values can come from code, from a JSON document,
//! or from a flat properties map using the `sqlayer.*` keys below.

use crate::error::{TxnError, TxnResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_COMMIT_AFTER_MILLIS: &str = "sqlayer.periodically_commit.after_millis";
pub const CONFIG_COMMIT_AFTER_BYTES: &str = "sqlayer.periodically_commit.after_bytes";
pub const CONFIG_COMMIT_SCAN_LIMIT: &str = "sqlayer.periodically_commit.scan_limit";
pub const CONFIG_CHECK_PREFIX: &str = "sqlayer.transaction_check.prefix";
pub const CONFIG_CHECK_PROBE_ATTEMPTS: &str = "sqlayer.transaction_check.probe_attempts";
pub const CONFIG_RETRY_MAX_ATTEMPTS: &str = "sqlayer.retry.max_attempts";
pub const CONFIG_RETRY_BASE_DELAY_MS: &str = "sqlayer.retry.base_delay_ms";
pub const CONFIG_RETRY_MAX_DELAY_MS: &str = "sqlayer.retry.max_delay_ms";

/// Transaction service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransactionConfig {
    /// Periodic commit once a physical transaction has been open this long
    pub commit_after_millis: u64,

    /// Periodic commit once this many key + value bytes have been written
    pub commit_after_bytes: u64,

    /// Rows a bulk scan should process between periodic-commit checks
    pub commit_scan_limit: usize,

    /// Keyspace prefix holding transaction-check counters
    pub check_keyspace_prefix: String,

    /// Salts tried before giving up on allocating a check token
    pub check_token_probe_attempts: u32,

    /// Conflict retry / backoff policy
    pub retry: RetryPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            commit_after_millis: 1_000,
            commit_after_bytes: 1_000_000,
            commit_scan_limit: 10_000,
            check_keyspace_prefix: "\u{1}sqlayer\u{0}transactionCheck\u{0}".to_string(),
            check_token_probe_attempts: 16,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransactionConfig {
    /// Parse configuration from a JSON document; missing fields take defaults
    pub fn from_json(json: &str) -> TxnResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TxnError::Config(format!("Invalid configuration JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> TxnResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TxnError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Build configuration from a flat properties map; absent keys take defaults
    pub fn from_properties(properties: &HashMap<String, String>) -> TxnResult<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_property(properties, CONFIG_COMMIT_AFTER_MILLIS)? {
            config.commit_after_millis = v;
        }
        if let Some(v) = parse_property(properties, CONFIG_COMMIT_AFTER_BYTES)? {
            config.commit_after_bytes = v;
        }
        if let Some(v) = parse_property(properties, CONFIG_COMMIT_SCAN_LIMIT)? {
            config.commit_scan_limit = v;
        }
        if let Some(v) = properties.get(CONFIG_CHECK_PREFIX) {
            config.check_keyspace_prefix = v.clone();
        }
        if let Some(v) = parse_property(properties, CONFIG_CHECK_PROBE_ATTEMPTS)? {
            config.check_token_probe_attempts = v;
        }
        if let Some(v) = parse_property(properties, CONFIG_RETRY_MAX_ATTEMPTS)? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_property(properties, CONFIG_RETRY_BASE_DELAY_MS)? {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_property(properties, CONFIG_RETRY_MAX_DELAY_MS)? {
            config.retry.max_delay_ms = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TxnResult<()> {
        if self.check_keyspace_prefix.is_empty() {
            return Err(TxnError::Config(
                "Transaction check prefix must not be empty".to_string(),
            ));
        }
        if self.check_token_probe_attempts == 0 {
            return Err(TxnError::Config(
                "Check token probe attempts must be at least 1".to_string(),
            ));
        }
        self.retry.validate()
    }

    pub fn commit_after(&self) -> Duration {
        Duration::from_millis(self.commit_after_millis)
    }

    pub fn check_prefix_bytes(&self) -> &[u8] {
        self.check_keyspace_prefix.as_bytes()
    }
}

fn parse_property<T: std::str::FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
) -> TxnResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match properties.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            TxnError::Config(format!("Invalid value '{}' for {}: {}", raw, key, e))
        }),
    }
}

/// Exponential backoff with bounded jitter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts allowed for one logical unit of work, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 10,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits; used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn validate(&self) -> TxnResult<()> {
        if self.max_attempts == 0 {
            return Err(TxnError::Config(
                "Retry max attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(TxnError::Config(format!(
                "Retry max delay {} ms is below base delay {} ms",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempts` have failed
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 1u64 << attempt.saturating_sub(1).min(16);
        let without_jitter = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);
        if without_jitter == 0 {
            return Duration::ZERO;
        }
        let jitter = fastrand::u64(0..=without_jitter / 4);
        Duration::from_millis(without_jitter.saturating_add(jitter).min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransactionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.commit_after(), Duration::from_secs(1));
        assert_eq!(config.commit_after_bytes, 1_000_000);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let json = r#"{"commit_after_millis": 250, "retry": {"max_attempts": 3}}"#;
        let config = TransactionConfig::from_json(json).unwrap();
        assert_eq!(config.commit_after_millis, 250);
        assert_eq!(config.commit_after_bytes, 1_000_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 10);
    }

    #[test]
    fn test_from_properties() {
        let mut props = HashMap::new();
        props.insert(CONFIG_COMMIT_AFTER_BYTES.to_string(), "2048".to_string());
        props.insert(CONFIG_RETRY_MAX_ATTEMPTS.to_string(), " 4 ".to_string());
        let config = TransactionConfig::from_properties(&props).unwrap();
        assert_eq!(config.commit_after_bytes, 2048);
        assert_eq!(config.retry.max_attempts, 4);

        props.insert(CONFIG_COMMIT_AFTER_MILLIS.to_string(), "soon".to_string());
        assert!(matches!(
            TransactionConfig::from_properties(&props),
            Err(TxnError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_retry_policy() {
        let mut config = TransactionConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        assert!(policy.backoff(1) >= Duration::from_millis(10));
        assert!(policy.backoff(15) <= Duration::from_millis(100));
        assert_eq!(RetryPolicy::immediate(3).backoff(5), Duration::ZERO);
        assert!(policy.allows_retry(19));
        assert!(!policy.allows_retry(20));
    }
}
