use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Counters shared by every collection worker of a run.
///
/// Uses atomic counters so concurrent workers can update it without locking.
#[derive(Debug, Default)]
pub struct RunStats {
    chapters_complete: AtomicUsize,
    chapters_partial: AtomicUsize,
    chapters_failed: AtomicUsize,
    chapters_not_found: AtomicUsize,
    items_downloaded: AtomicUsize,
    items_failed: AtomicUsize,
    retried: AtomicUsize,
    cache_hits: AtomicUsize,
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub chapters_complete: usize,
    pub chapters_partial: usize,
    pub chapters_failed: usize,
    pub chapters_not_found: usize,
    pub items_downloaded: usize,
    pub items_failed: usize,
    pub retried: usize,
    pub cache_hits: usize,
}

impl StatsSnapshot {
    /// Chapters that reached a verdict of any kind.
    #[must_use]
    pub fn chapters_total(&self) -> usize {
        self.chapters_complete + self.chapters_partial + self.chapters_failed + self.chapters_not_found
    }
}

impl RunStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn chapters_complete(&self) -> usize {
        self.chapters_complete.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chapters_partial(&self) -> usize {
        self.chapters_partial.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chapters_failed(&self) -> usize {
        self.chapters_failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chapters_not_found(&self) -> usize {
        self.chapters_not_found.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn items_downloaded(&self) -> usize {
        self.items_downloaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn items_failed(&self) -> usize {
        self.items_failed.load(Ordering::SeqCst)
    }

    /// Number of chapter retries performed.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Chapters answered from the analysis cache.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chapters_complete: self.chapters_complete(),
            chapters_partial: self.chapters_partial(),
            chapters_failed: self.chapters_failed(),
            chapters_not_found: self.chapters_not_found(),
            items_downloaded: self.items_downloaded(),
            items_failed: self.items_failed(),
            retried: self.retried(),
            cache_hits: self.cache_hits(),
        }
    }

    pub(super) fn increment_complete(&self) {
        self.chapters_complete.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn increment_partial(&self) {
        self.chapters_partial.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn increment_failed(&self) {
        self.chapters_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn increment_not_found(&self) {
        self.chapters_not_found.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn add_items(&self, downloaded: usize, failed: usize) {
        self.items_downloaded.fetch_add(downloaded, Ordering::SeqCst);
        self.items_failed.fetch_add(failed, Ordering::SeqCst);
    }

    pub(super) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }
}
