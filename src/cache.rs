//! Analysis result cache.
//!
//! [`AnalysisCache`] remembers the final completeness report of each chapter
//! for a limited time, so re-processing an already complete chapter within one
//! run does not re-render it. The cache is an explicit object owned by the
//! orchestrator; expired entries are dropped by [`AnalysisCache::evict_expired`],
//! which the orchestrator calls on a fixed schedule.
//!
//! # Thread Safety
//!
//! `AnalysisCache` is `Send + Sync` and is shared behind an `Arc` by every
//! collection worker. `DashMap` shards its locks, so workers touching
//! different chapters do not contend.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::completeness::CompletenessReport;

/// Identifies one chapter of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterKey {
    pub collection_id: String,
    pub chapter: u32,
}

impl ChapterKey {
    #[must_use]
    pub fn new(collection_id: impl Into<String>, chapter: u32) -> Self {
        Self {
            collection_id: collection_id.into(),
            chapter,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    report: CompletenessReport,
    stored_at: Instant,
}

/// TTL cache of completeness reports.
#[derive(Debug)]
pub struct AnalysisCache {
    entries: DashMap<ChapterKey, CacheEntry>,
    ttl: Duration,
}

impl AnalysisCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached report for `key`, unless it has expired.
    #[must_use]
    pub fn get(&self, key: &ChapterKey) -> Option<CompletenessReport> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.report.clone())
    }

    /// Stores (or replaces) the report for `key`.
    pub fn insert(&self, key: ChapterKey, report: CompletenessReport) {
        self.entries.insert(
            key,
            CacheEntry {
                report,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops the entry for `key`.
    pub fn invalidate(&self, key: &ChapterKey) {
        self.entries.remove(key);
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < ttl);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "evicted expired analysis entries");
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
