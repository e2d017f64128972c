//! Error classification and retry policy for chapter attempts.
//!
//! Every chapter failure is classified into an [`ErrorClass`]; the
//! [`RetryPolicy`] then decides whether another attempt is worth it and how
//! long to wait first.
//!
//! | Class | Retryable | Base delay |
//! |-------|-----------|------------|
//! | `Timeout` | yes | `timeout_delay` |
//! | `NetworkError` | yes | `network_delay` |
//! | `ElementNotFound` | yes | `short_delay` |
//! | `NotFound` | no | - |
//! | `Unknown` | yes | `short_delay` |
//!
//! Backoff is linear: `delay = base * attempt + jitter`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use chapter_fetcher::retry::{ErrorClass, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(ErrorClass::NetworkError, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(attempt, 2);
//!         assert!(delay >= Duration::from_secs(5));
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::ChapterError;
use crate::navigator::NavigationError;
use crate::session::SessionError;

/// Default maximum attempts per chapter.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_TIMEOUT_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_NETWORK_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_SHORT_DELAY: Duration = Duration::from_secs(1);

/// Maximum jitter added to delays (250ms).
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Failure taxonomy used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The remote or the session did not answer in time.
    Timeout,
    /// The chapter does not exist.
    NotFound,
    /// Transport failure or error status.
    NetworkError,
    /// Expected content was not rendered.
    ElementNotFound,
    /// Anything else; retried conservatively.
    Unknown,
}

/// Decision on whether to retry a failed chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Give up on the chapter.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Linear-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    timeout_delay: Duration,
    network_delay: Duration,
    short_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_delay: DEFAULT_TIMEOUT_DELAY,
            network_delay: DEFAULT_NETWORK_DELAY,
            short_delay: DEFAULT_SHORT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        timeout_delay: Duration,
        network_delay: Duration,
        short_delay: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout_delay,
            network_delay,
            short_delay,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay for a failure class.
    #[must_use]
    pub fn base_delay(&self, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::Timeout => self.timeout_delay,
            ErrorClass::NetworkError => self.network_delay,
            ErrorClass::ElementNotFound | ErrorClass::Unknown | ErrorClass::NotFound => {
                self.short_delay
            }
        }
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed with `class`.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if class == ErrorClass::NotFound {
            return RetryDecision::DoNotRetry {
                reason: "chapter not found - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(class, attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    fn calculate_delay(&self, class: ErrorClass, attempt: u32) -> Duration {
        self.base_delay(class).saturating_mul(attempt.max(1)) + calculate_jitter()
    }
}

fn calculate_jitter() -> Duration {
    let max_ms = u64::try_from(MAX_JITTER.as_millis()).unwrap_or(u64::MAX);
    let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
    Duration::from_millis(jitter_ms)
}

/// Classifies a chapter failure.
///
/// | Failure | Class |
/// |---------|-------|
/// | 404 / 410 | `NotFound` |
/// | HTTP 408 / 504 | `Timeout` |
/// | other HTTP error status | `NetworkError` |
/// | no valid content | `ElementNotFound` |
/// | session timeout / network / missing element | like-named class |
/// | invalid locator | `NotFound` |
/// | anything else | `Unknown` |
#[must_use]
pub fn classify_error(error: &ChapterError) -> ErrorClass {
    match error {
        ChapterError::Navigation(NavigationError::NotFound { .. }) => ErrorClass::NotFound,
        ChapterError::Navigation(NavigationError::HttpError { status, .. }) => {
            classify_http_status(*status)
        }
        ChapterError::Navigation(NavigationError::NoValidContent { .. })
        | ChapterError::NoValidContent { .. } => ErrorClass::ElementNotFound,
        ChapterError::Navigation(NavigationError::Session { source, .. })
        | ChapterError::Session { source, .. } => classify_session_error(source),
        ChapterError::Io { .. } => ErrorClass::Unknown,
    }
}

fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        408 | 504 => ErrorClass::Timeout,
        404 | 410 => ErrorClass::NotFound,
        _ => ErrorClass::NetworkError,
    }
}

fn classify_session_error(error: &SessionError) -> ErrorClass {
    match error {
        SessionError::Timeout { .. } => ErrorClass::Timeout,
        SessionError::Network { .. } => ErrorClass::NetworkError,
        SessionError::ElementNotFound { .. } => ErrorClass::ElementNotFound,
        SessionError::InvalidLocator { .. } => ErrorClass::NotFound,
        SessionError::NoPage | SessionError::Closed => ErrorClass::Unknown,
    }
}
