use std::path::PathBuf;

use serde::Serialize;

use super::stats::StatsSnapshot;
use crate::completeness::CompletenessReport;
use crate::error::FailureStage;
use crate::fetcher::FetchSummary;
use crate::retry::ErrorClass;

/// One parent collection to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    /// Identifier substituted into the locator template.
    pub id: String,
    /// Directory name on disk.
    pub name: String,
    /// First chapter to process.
    pub first_chapter: u32,
    /// Last chapter to process; `None` walks until the end-of-collection signal.
    pub last_chapter: Option<u32>,
}

impl Collection {
    /// Open-ended collection starting at chapter 1, stored under its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            first_chapter: 1,
            last_chapter: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_range(mut self, first_chapter: u32, last_chapter: Option<u32>) -> Self {
        self.first_chapter = first_chapter;
        self.last_chapter = last_chapter;
        self
    }
}

/// One fetchable chapter within a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub parent_id: String,
    pub index: u32,
    pub locator: String,
}

/// Final verdict for a chapter.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChapterOutcome {
    /// Every item is on disk.
    Complete {
        report: CompletenessReport,
        fetch: FetchSummary,
        /// Answered from the analysis cache without rendering.
        cached: bool,
    },
    /// Some items are still missing after the fetch pass.
    Partial {
        report: CompletenessReport,
        fetch: FetchSummary,
    },
    /// The chapter does not exist (or never showed content).
    NotFound,
    /// Retries were exhausted.
    Failed {
        class: ErrorClass,
        stage: FailureStage,
        error: String,
    },
}

impl ChapterOutcome {
    /// Whether this outcome counts towards the end-of-collection heuristic.
    #[must_use]
    pub fn is_navigation_failure(&self) -> bool {
        match self {
            Self::NotFound => true,
            Self::Failed { stage, .. } => *stage == FailureStage::Navigation,
            Self::Complete { .. } | Self::Partial { .. } => false,
        }
    }

    /// Items still missing, when the chapter was analysed.
    #[must_use]
    pub fn missing_items(&self) -> usize {
        match self {
            Self::Partial { report, .. } => report.missing_count(),
            Self::Complete { .. } | Self::NotFound | Self::Failed { .. } => 0,
        }
    }

    /// Items written during this run.
    #[must_use]
    pub fn downloaded_items(&self) -> usize {
        match self {
            Self::Complete { fetch, .. } | Self::Partial { fetch, .. } => fetch.downloaded,
            Self::NotFound | Self::Failed { .. } => 0,
        }
    }
}

/// Per-chapter result.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterResult {
    pub index: u32,
    pub title: Option<String>,
    /// Attempts made; 0 when answered from the cache.
    pub attempts: u32,
    /// Corroborating count from the expected-count provider.
    pub expected_count: Option<u32>,
    /// Artifact produced by the document compiler.
    pub compiled: Option<PathBuf>,
    /// Compiler failure, if it ran and failed.
    pub compile_error: Option<String>,
    pub outcome: ChapterOutcome,
}

impl ChapterResult {
    pub(super) fn bare(index: u32, attempts: u32, outcome: ChapterOutcome) -> Self {
        Self {
            index,
            title: None,
            attempts,
            expected_count: None,
            compiled: None,
            compile_error: None,
            outcome,
        }
    }
}

/// Why a collection worker stopped advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The requested chapter range was fully walked.
    RangeExhausted,
    /// Too many consecutive chapters failed navigation; likely past the last chapter.
    EndOfCollection { consecutive_failures: u32 },
    /// An open-ended collection hit the chapter cap.
    ChapterCap { max_chapters: u32 },
}

/// Per-collection summary.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    pub collection_id: String,
    pub name: String,
    pub chapters: Vec<ChapterResult>,
    pub stop_reason: StopReason,
}

impl CollectionSummary {
    fn count(&self, predicate: impl Fn(&ChapterOutcome) -> bool) -> usize {
        self.chapters.iter().filter(|c| predicate(&c.outcome)).count()
    }

    #[must_use]
    pub fn complete_count(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::Complete { .. }))
    }

    #[must_use]
    pub fn partial_count(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::Partial { .. }))
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn not_found_count(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::NotFound))
    }

    /// Aggregate missing items across partial chapters.
    #[must_use]
    pub fn missing_items(&self) -> usize {
        self.chapters.iter().map(|c| c.outcome.missing_items()).sum()
    }

    #[must_use]
    pub fn downloaded_items(&self) -> usize {
        self.chapters.iter().map(|c| c.outcome.downloaded_items()).sum()
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub collections: Vec<CollectionSummary>,
    /// Collections never started because no session became available.
    pub pool_exhausted: Vec<String>,
    pub stats: StatsSnapshot,
}

impl RunSummary {
    /// Whether anything needs another run: exhaustion, failed or partial chapters.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.pool_exhausted.is_empty()
            || self
                .collections
                .iter()
                .any(|c| c.failed_count() > 0 || c.partial_count() > 0)
    }

    /// Whether at least one chapter ended complete.
    #[must_use]
    pub fn has_successes(&self) -> bool {
        self.collections.iter().any(|c| c.complete_count() > 0)
    }
}
