//! Ordered-candidate fallback.
//!
//! [`try_in_order`] runs an async attempt against each candidate in turn and
//! returns the first success. When every candidate fails, the caller gets an
//! [`AggregateError`] listing each candidate with its failure.
//!
//! ```
//! use chapter_fetcher::fallback::try_in_order;
//!
//! # tokio_test_block(async {
//! let keys = ["a", "b", "c"];
//! let found = try_in_order(&keys, |key| {
//!     let key = *key;
//!     async move { if key == "b" { Ok(2) } else { Err(format!("{key} rejected")) } }
//! })
//! .await;
//! assert_eq!(found.unwrap(), 2);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::future::Future;

use tracing::debug;

/// Every candidate failed.
#[derive(Debug)]
pub struct AggregateError<C, E> {
    /// Each candidate with the error it produced, in the order tried.
    pub failures: Vec<(C, E)>,
}

impl<C, E> AggregateError<C, E> {
    /// Number of candidates tried.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<C: fmt::Debug, E: fmt::Display> fmt::Display for AggregateError<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no candidates to try");
        }
        write!(f, "all {} candidates failed", self.failures.len())?;
        for (candidate, error) in &self.failures {
            write!(f, "; {candidate:?}: {error}")?;
        }
        Ok(())
    }
}

impl<C, E> std::error::Error for AggregateError<C, E>
where
    C: fmt::Debug,
    E: fmt::Debug + fmt::Display,
{
}

/// Tries `attempt` on each candidate in order, returning the first success.
///
/// # Errors
///
/// Returns [`AggregateError`] with every failure when no candidate succeeds
/// (including when `candidates` is empty).
pub async fn try_in_order<'a, C, T, E, F, Fut>(
    candidates: &'a [C],
    mut attempt: F,
) -> Result<T, AggregateError<&'a C, E>>
where
    F: FnMut(&'a C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut failures = Vec::new();
    for (position, candidate) in candidates.iter().enumerate() {
        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                debug!(position, error = %error, "candidate failed, trying next");
                failures.push((candidate, error));
            }
        }
    }
    Err(AggregateError { failures })
}
