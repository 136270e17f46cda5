// src/config.rs
//
// Converter configuration: defaults plus environment overrides.

use crate::engine::ExecutionContext;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;
/// Reported by `get_image_info` when no strategy can read the image.
pub const DEFAULT_DIMENSIONS: (u32, u32) = (800, 600);

/// Upper bound accepted for `batch_concurrency`
pub const MAX_BATCH_CONCURRENCY: usize = 1024;

pub const ENV_DECODE_TIMEOUT_MS: &str = "LAZY_CONVERT_DECODE_TIMEOUT_MS";
pub const ENV_EXECUTION: &str = "LAZY_CONVERT_EXECUTION";
pub const ENV_BATCH_CONCURRENCY: &str = "LAZY_CONVERT_BATCH_CONCURRENCY";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Upper bound on one decode attempt.
    pub decode_timeout: Duration,
    /// Where render+encode runs.
    pub execution: ExecutionContext,
    /// Files converted at once by `convert_batch`.
    pub batch_concurrency: usize,
    pub default_dimensions: (u32, u32),
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            decode_timeout: DEFAULT_DECODE_TIMEOUT,
            execution: ExecutionContext::Inline,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            default_dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

impl ConverterConfig {
    /// Defaults overridden by `LAZY_CONVERT_*` environment variables.
    /// Values that do not parse are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_DECODE_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.decode_timeout = Duration::from_millis(ms),
                _ => warn!(target: "lazy_convert::config", var = ENV_DECODE_TIMEOUT_MS, value = %raw, "ignoring invalid value"),
            }
        }

        if let Some(raw) = lookup(ENV_EXECUTION) {
            match ExecutionContext::from_name(&raw) {
                Some(execution) => config.execution = execution,
                None => warn!(target: "lazy_convert::config", var = ENV_EXECUTION, value = %raw, "ignoring invalid value"),
            }
        }

        if let Some(raw) = lookup(ENV_BATCH_CONCURRENCY) {
            match raw.trim().parse::<usize>() {
                Ok(n) if (1..=MAX_BATCH_CONCURRENCY).contains(&n) => config.batch_concurrency = n,
                _ => warn!(target: "lazy_convert::config", var = ENV_BATCH_CONCURRENCY, value = %raw, "ignoring invalid value"),
            }
        }

        config
    }

    /// A zero timeout is ignored, the same as `LAZY_CONVERT_DECODE_TIMEOUT_MS=0`.
    pub fn with_decode_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!(target: "lazy_convert::config", "ignoring zero decode timeout");
        } else {
            self.decode_timeout = timeout;
        }
        self
    }

    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.clamp(1, MAX_BATCH_CONCURRENCY);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConverterConfig::default();
        assert_eq!(config.decode_timeout, Duration::from_secs(30));
        assert_eq!(config.execution, ExecutionContext::Inline);
        assert_eq!(config.batch_concurrency, 3);
        assert_eq!(config.default_dimensions, (800, 600));
    }

    #[test]
    fn test_env_overrides_apply() {
        let config = ConverterConfig::from_lookup(lookup(&[
            (ENV_DECODE_TIMEOUT_MS, "1500"),
            (ENV_EXECUTION, "Background"),
            (ENV_BATCH_CONCURRENCY, "8"),
        ]));
        assert_eq!(config.decode_timeout, Duration::from_millis(1500));
        assert_eq!(config.execution, ExecutionContext::Background);
        assert_eq!(config.batch_concurrency, 8);
    }

    #[test]
    fn test_invalid_env_values_keep_defaults() {
        let config = ConverterConfig::from_lookup(lookup(&[
            (ENV_DECODE_TIMEOUT_MS, "soon"),
            (ENV_EXECUTION, "gpu"),
            (ENV_BATCH_CONCURRENCY, "0"),
        ]));
        assert_eq!(config, ConverterConfig::default());
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = ConverterConfig::default().with_batch_concurrency(0);
        assert_eq!(config.batch_concurrency, 1);
    }

    #[test]
    fn test_zero_timeout_is_rejected_like_env() {
        let config = ConverterConfig::default()
            .with_decode_timeout(Duration::from_millis(250))
            .with_decode_timeout(Duration::ZERO);
        assert_eq!(config.decode_timeout, Duration::from_millis(250));

        let from_env = ConverterConfig::from_lookup(lookup(&[(ENV_DECODE_TIMEOUT_MS, "0")]));
        assert_eq!(from_env.decode_timeout, DEFAULT_DECODE_TIMEOUT);
    }
}
