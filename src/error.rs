//! Crate-level error types.
//!
//! Errors are layered by how far they may travel:
//! - item failures stop in the fetcher ([`crate::fetcher::FetchItemError`])
//! - chapter failures ([`ChapterError`]) stop in the per-collection worker loop
//! - [`EngineError`] covers orchestrator setup; pool exhaustion is escalated
//!   through [`crate::RunSummary::pool_exhausted`] instead

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::navigator::NavigationError;
use crate::session::SessionError;

/// Where in the chapter pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Navigation,
    Load,
    Fetch,
    Storage,
}

impl FailureStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Load => "load",
            Self::Fetch => "fetch",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one chapter attempt.
#[derive(Debug, Error)]
pub enum ChapterError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    /// The page rendered but no valid content element survived the exhaustive load.
    #[error("no valid content at {locator}")]
    NoValidContent {
        /// Locator of the chapter.
        locator: String,
    },

    #[error("session failed during {stage}: {source}")]
    Session {
        stage: FailureStage,
        #[source]
        source: SessionError,
    },

    #[error("local storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ChapterError {
    pub fn session(stage: FailureStage, source: SessionError) -> Self {
        Self::Session { stage, source }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Pipeline stage the failure belongs to.
    ///
    /// An empty chapter counts as a navigation failure, so it feeds the
    /// end-of-collection heuristic.
    #[must_use]
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Navigation(_) | Self::NoValidContent { .. } => FailureStage::Navigation,
            Self::Session { stage, .. } => *stage,
            Self::Io { .. } => FailureStage::Storage,
        }
    }

    /// Whether the chapter loaded without any usable content.
    #[must_use]
    pub fn is_no_valid_content(&self) -> bool {
        matches!(
            self,
            Self::NoValidContent { .. } | Self::Navigation(NavigationError::NoValidContent { .. })
        )
    }
}

/// Engine setup failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
}
