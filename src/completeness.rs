//! Completeness analysis.
//!
//! Reconciles the local item set with the remote item count.
//!
//! # Lenient Fallback
//!
//! When no remote count can be obtained at all, a chapter would otherwise stay
//! unresolved forever. [`analyze`] then accepts a local set as `Complete` if it
//! holds at least [`LenientPolicy::min_items`] items with at most
//! [`LenientPolicy::max_gaps`] holes below its highest index. This trades
//! strictness for availability: such a report is flagged `lenient` and lists
//! the gaps it tolerated, so callers can tell it apart from a verified one.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::local::LocalState;

/// Thresholds of the no-remote-count fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenientPolicy {
    /// Minimum local items.
    pub min_items: usize,
    /// Maximum holes below the highest local index.
    pub max_gaps: usize,
}

/// Reconciliation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessStatus {
    /// Every item `1..=remote_count` is on disk.
    Complete,
    /// Some items are missing (or the remote count is unknown).
    PartialMissing,
    /// Nothing valid is on disk yet.
    Empty,
}

/// Result of comparing local state against the remote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub local_count: usize,
    /// Remote item count; 0 when unknown.
    pub remote_count: u32,
    /// Always a subset of `1..=remote_count`.
    pub missing_indices: BTreeSet<u32>,
    pub status: CompletenessStatus,
    /// Whether the lenient fallback produced this verdict.
    pub lenient: bool,
    /// Holes accepted by the lenient fallback.
    pub tolerated_gaps: BTreeSet<u32>,
}

impl CompletenessReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == CompletenessStatus::Complete
    }

    /// Number of items known to be missing.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.missing_indices.len()
    }
}

/// Compares `local` against `remote_count`.
///
/// `None` means the exhaustive load failed and no count exists; the lenient
/// fallback then decides (see the module docs). A lenient report keeps
/// `remote_count` at 0. `Some(0)` is handled like `None`; callers treat a load
/// that settles at zero as a page without content and never get here with it.
#[must_use]
pub fn analyze(
    local: &LocalState,
    remote_count: Option<u32>,
    lenient: &LenientPolicy,
) -> CompletenessReport {
    match remote_count.filter(|count| *count > 0) {
        Some(expected) => analyze_against(local, expected),
        None => analyze_without_remote(local, lenient),
    }
}

fn analyze_against(local: &LocalState, expected: u32) -> CompletenessReport {
    let missing_indices: BTreeSet<u32> = (1..=expected)
        .filter(|index| !local.contains(*index))
        .collect();
    let status = if local.is_empty() {
        CompletenessStatus::Empty
    } else if missing_indices.is_empty() {
        CompletenessStatus::Complete
    } else {
        CompletenessStatus::PartialMissing
    };

    CompletenessReport {
        local_count: local.count(),
        remote_count: expected,
        missing_indices,
        status,
        lenient: false,
        tolerated_gaps: BTreeSet::new(),
    }
}

fn analyze_without_remote(local: &LocalState, lenient: &LenientPolicy) -> CompletenessReport {
    let mut report = CompletenessReport {
        local_count: local.count(),
        remote_count: 0,
        missing_indices: BTreeSet::new(),
        status: CompletenessStatus::Empty,
        lenient: false,
        tolerated_gaps: BTreeSet::new(),
    };
    if local.is_empty() {
        return report;
    }

    let gaps = local.gaps();
    if local.count() >= lenient.min_items && gaps.len() <= lenient.max_gaps {
        report.status = CompletenessStatus::Complete;
        report.lenient = true;
        report.tolerated_gaps = gaps;
    } else {
        report.status = CompletenessStatus::PartialMissing;
    }
    report
}
