//! Engine configuration.
//!
//! [`EngineConfig`] is the single place every tunable of the download engine
//! lives. Components never read ad hoc option bags; they receive the slice of
//! configuration they need (a [`RetryPolicy`], [`LoadParams`], ...) derived
//! from this struct.
//!
//! # Defaults
//!
//! | Option | Default |
//! |--------|---------|
//! | `pool_size` | 2 |
//! | `max_attempts` | 3 |
//! | `min_valid_size` | 4096 bytes |
//! | `stable_threshold` | 3 rounds |
//! | `max_rounds` | 60 rounds |
//! | `consecutive_failure_limit` | 3 chapters |
//! | `acquire_timeout` | 120 s |
//! | `lenient_min_items` / `lenient_max_gaps` | 10 / 2 |

use std::time::Duration;

use thiserror::Error;

use crate::completeness::LenientPolicy;
use crate::fetcher::FetchParams;
use crate::load::LoadParams;
use crate::retry::RetryPolicy;

/// Default number of rendering sessions in the pool.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Default attempts per chapter, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default minimum size for an item file to count as valid (4 KiB).
pub const DEFAULT_MIN_VALID_SIZE: u64 = 4096;

/// Default number of consecutive unchanged rounds before a count is trusted.
pub const DEFAULT_STABLE_THRESHOLD: u32 = 3;

/// Default cap on exhaustive-load rounds.
pub const DEFAULT_MAX_ROUNDS: u32 = 60;

/// Default number of consecutive failed chapters that ends a collection.
pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Largest pool the engine accepts.
const MAX_POOL_SIZE: usize = 32;

/// Largest `max_attempts` the engine accepts.
const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Largest `max_rounds` the engine accepts.
const MAX_ROUNDS_LIMIT: u32 = 10_000;

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric option is outside its accepted range.
    #[error("invalid value for `{field}`: {value} (expected {expected})")]
    OutOfRange {
        /// Option name.
        field: &'static str,
        /// Rejected value, rendered.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },

    /// A string option cannot be used in file names.
    #[error("invalid value for `{field}`: {value:?} ({reason})")]
    InvalidName {
        /// Option name.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Every recognised engine option with its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of rendering sessions, and therefore of concurrently active collections.
    pub pool_size: usize,
    /// Attempts per chapter (including the first) for retryable failures.
    pub max_attempts: u32,
    /// Attempts for a chapter whose page loads but shows no content.
    pub no_content_attempts: u32,
    /// Item files smaller than this are treated as missing.
    pub min_valid_size: u64,
    /// Unchanged rounds required (at the bottom) before the live count is trusted.
    pub stable_threshold: u32,
    /// Hard cap on exhaustive-load rounds.
    pub max_rounds: u32,
    /// Consecutive failed chapters after which a collection is considered finished.
    pub consecutive_failure_limit: u32,
    /// Upper bound on chapters walked for an open-ended collection.
    pub max_chapters: u32,
    /// How long a worker waits for a free session.
    pub acquire_timeout: Duration,
    /// Poll interval while waiting for a free session.
    pub acquire_poll_interval: Duration,
    /// Viewport advance per load round, in pixels.
    pub scroll_step_px: u32,
    /// Wait after each load step before counting.
    pub settle_interval: Duration,
    /// Missing-item count above which fetching is split into batches.
    pub batch_threshold: usize,
    /// Items per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Lenient fallback: minimum local items to accept without a remote count.
    pub lenient_min_items: usize,
    /// Lenient fallback: maximum tolerated gaps without a remote count.
    pub lenient_max_gaps: usize,
    /// Middle part of item file names (`<index>-<suffix>.<ext>`).
    pub item_suffix: String,
    /// Extension used when a payload does not name one.
    pub default_extension: String,
    /// Lifetime of a cached analysis result.
    pub cache_ttl: Duration,
    /// How often expired cache entries are swept during a run.
    pub cache_sweep_interval: Duration,
    /// Base retry delay after a timeout.
    pub timeout_delay: Duration,
    /// Base retry delay after a network error.
    pub network_delay: Duration,
    /// Base retry delay for element and unknown failures.
    pub short_delay: Duration,
    /// Candidate keys handed to the expected-count provider, tried in order.
    pub count_keys: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            no_content_attempts: 2,
            min_valid_size: DEFAULT_MIN_VALID_SIZE,
            stable_threshold: DEFAULT_STABLE_THRESHOLD,
            max_rounds: DEFAULT_MAX_ROUNDS,
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            max_chapters: 2000,
            acquire_timeout: Duration::from_secs(120),
            acquire_poll_interval: Duration::from_millis(250),
            scroll_step_px: 1200,
            settle_interval: Duration::from_millis(400),
            batch_threshold: 40,
            batch_size: 20,
            batch_pause: Duration::from_millis(500),
            lenient_min_items: 10,
            lenient_max_gaps: 2,
            item_suffix: "page".to_string(),
            default_extension: "jpg".to_string(),
            cache_ttl: Duration::from_secs(600),
            cache_sweep_interval: Duration::from_secs(60),
            timeout_delay: Duration::from_secs(2),
            network_delay: Duration::from_secs(5),
            short_delay: Duration::from_secs(1),
            count_keys: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Checks every option against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_POOL_SIZE).contains(&self.pool_size) {
            return Err(ConfigError::out_of_range("pool_size", self.pool_size, "1..=32"));
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(ConfigError::out_of_range(
                "max_attempts",
                self.max_attempts,
                "1..=10",
            ));
        }
        if self.no_content_attempts == 0 {
            return Err(ConfigError::out_of_range(
                "no_content_attempts",
                self.no_content_attempts,
                ">= 1",
            ));
        }
        if !(1..=MAX_ROUNDS_LIMIT).contains(&self.max_rounds) {
            return Err(ConfigError::out_of_range(
                "max_rounds",
                self.max_rounds,
                "1..=10000",
            ));
        }
        if self.stable_threshold == 0 || self.stable_threshold > self.max_rounds {
            return Err(ConfigError::out_of_range(
                "stable_threshold",
                self.stable_threshold,
                "1..=max_rounds",
            ));
        }
        if self.consecutive_failure_limit == 0 {
            return Err(ConfigError::out_of_range(
                "consecutive_failure_limit",
                self.consecutive_failure_limit,
                ">= 1",
            ));
        }
        if self.max_chapters == 0 {
            return Err(ConfigError::out_of_range(
                "max_chapters",
                self.max_chapters,
                ">= 1",
            ));
        }
        if self.acquire_poll_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "acquire_poll_interval",
                "0ms",
                "> 0ms",
            ));
        }
        if self.cache_sweep_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "cache_sweep_interval",
                "0ms",
                "> 0ms",
            ));
        }
        if self.scroll_step_px == 0 {
            return Err(ConfigError::out_of_range(
                "scroll_step_px",
                self.scroll_step_px,
                ">= 1",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::out_of_range("batch_size", self.batch_size, ">= 1"));
        }
        validate_name_part("item_suffix", &self.item_suffix)?;
        validate_name_part("default_extension", &self.default_extension)?;
        if self.default_extension.contains('.') {
            return Err(ConfigError::InvalidName {
                field: "default_extension",
                value: self.default_extension.clone(),
                reason: "extension must not contain '.'",
            });
        }
        Ok(())
    }

    /// Retry policy derived from the attempt count and delays.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.timeout_delay,
            self.network_delay,
            self.short_delay,
        )
    }

    /// Parameters of the exhaustive-load driver.
    #[must_use]
    pub fn load_params(&self) -> LoadParams {
        LoadParams {
            stable_threshold: self.stable_threshold,
            max_rounds: self.max_rounds,
            scroll_step_px: self.scroll_step_px,
            settle_interval: self.settle_interval,
        }
    }

    /// Parameters of the incremental fetcher.
    #[must_use]
    pub fn fetch_params(&self) -> FetchParams {
        FetchParams {
            min_valid_size: self.min_valid_size,
            batch_threshold: self.batch_threshold,
            batch_size: self.batch_size,
            batch_pause: self.batch_pause,
            item_suffix: self.item_suffix.clone(),
            default_extension: self.default_extension.clone(),
        }
    }

    /// Thresholds of the no-remote-count fallback.
    #[must_use]
    pub fn lenient_policy(&self) -> LenientPolicy {
        LenientPolicy {
            min_items: self.lenient_min_items,
            max_gaps: self.lenient_max_gaps,
        }
    }
}

fn validate_name_part(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
            reason: "must not be empty",
        });
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
            reason: "only ASCII letters, digits, '_', '-' and '.' are allowed",
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_default_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.min_valid_size, 4096);
        assert_eq!(config.stable_threshold, 3);
        assert_eq!(config.max_rounds, 60);
        assert_eq!(config.consecutive_failure_limit, 3);
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = EngineConfig {
            pool_size: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_validate_rejects_oversized_pool() {
        let config = EngineConfig {
            pool_size: 33,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "pool_size",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_threshold_above_rounds() {
        let config = EngineConfig {
            stable_threshold: 10,
            max_rounds: 5,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "stable_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_path_separator_in_suffix() {
        let config = EngineConfig {
            item_suffix: "a/b".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidName {
                field: "item_suffix",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_dotted_extension() {
        let config = EngineConfig {
            default_extension: ".png".to_string(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_policies_carry_values() {
        let config = EngineConfig {
            max_attempts: 5,
            lenient_min_items: 7,
            lenient_max_gaps: 1,
            stable_threshold: 4,
            ..EngineConfig::default()
        };
        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert_eq!(config.lenient_policy().min_items, 7);
        assert_eq!(config.lenient_policy().max_gaps, 1);
        assert_eq!(config.load_params().stable_threshold, 4);
        assert_eq!(config.fetch_params().min_valid_size, 4096);
    }
}
