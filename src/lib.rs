//! Chapter Fetcher Core Library
//!
//! Resumable, incremental downloading of lazily rendered, paginated chapters.
//! A run walks one or more collections chapter by chapter; for each chapter the
//! remote page is exhaustively loaded until its item count stabilises, that
//! count is reconciled against what is already on disk, and only the missing
//! items are fetched.
//!
//! # Architecture
//!
//! - [`session`] - Rendering session seam, the bounded [`SessionPool`] and a static [`HttpSession`]
//! - [`navigator`] - Loads a chapter and checks for content markers
//! - [`load`] - Exhaustive-load state machine and driver
//! - [`local`] / [`layout`] - On-disk state and storage conventions
//! - [`completeness`] - Local versus remote reconciliation
//! - [`fetcher`] - Downloads only the missing items
//! - [`retry`] / [`fallback`] - Error classification, retry policy, ordered fallbacks
//! - [`orchestrator`] - Drives collections over the pool and summarises the run

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod collaborators;
pub mod completeness;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fetcher;
pub mod layout;
pub mod load;
pub mod local;
pub mod locator;
pub mod navigator;
pub mod orchestrator;
pub mod retry;
pub mod session;

mod user_agent;

// Re-export commonly used types
pub use cache::{AnalysisCache, ChapterKey};
pub use collaborators::{CollaboratorError, DocumentCompiler, ExpectedCountProvider};
pub use completeness::{CompletenessReport, CompletenessStatus, LenientPolicy, analyze};
pub use config::{
    ConfigError, DEFAULT_CONSECUTIVE_FAILURE_LIMIT, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_ROUNDS,
    DEFAULT_MIN_VALID_SIZE, DEFAULT_POOL_SIZE, DEFAULT_STABLE_THRESHOLD, EngineConfig,
};
pub use error::{ChapterError, EngineError, FailureStage};
pub use fallback::{AggregateError, try_in_order};
pub use fetcher::{FetchSummary, IncrementalFetcher};
pub use local::{ItemFile, LocalState, scan_local_state};
pub use locator::{LocatorError, LocatorTemplate};
pub use navigator::{ChapterNavigator, NavigationError};
pub use orchestrator::{
    ChapterOutcome, ChapterResult, Collection, CollectionSummary, Orchestrator, RunStats,
    RunSummary, StatsSnapshot, StopReason,
};
pub use retry::{ErrorClass, RetryDecision, RetryPolicy, classify_error};
pub use session::{
    ContentElement, HttpSession, ItemPayload, PageResponse, PoolError, RenderSession,
    ScrollPosition, SessionError, SessionLease, SessionPool, SharedSession,
};
