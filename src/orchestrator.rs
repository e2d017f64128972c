//! Run orchestration.
//!
//! The [`Orchestrator`] turns a list of [`Collection`]s into a [`RunSummary`]:
//!
//! 1. A session is leased from the [`SessionPool`] for each collection
//! 2. The collection's chapters are walked strictly in increasing order on that session
//! 3. Each chapter is navigated, exhaustively loaded, reconciled against disk,
//!    and its missing items fetched
//! 4. The session is released when the collection is done, whatever the outcome
//!
//! # Concurrency Model
//!
//! - Each collection runs in its own Tokio task holding one [`SessionLease`]
//! - The pool size is the only concurrency bound: the dispatcher waits for a
//!   running collection to finish while every session is busy
//! - Pool exhaustion (a timed-out acquisition) is the only failure escalated
//!   here; it stops dispatching, and the remaining collections are reported as
//!   not started
//! - Shared state is limited to the pool, the [`AnalysisCache`] and the atomic
//!   [`RunStats`]
//!
//! # Propagation
//!
//! - Item failures stay inside the fetcher and surface as a partial chapter
//! - Chapter failures are retried per the [`RetryPolicy`](crate::retry::RetryPolicy),
//!   then recorded; the worker moves on to the next chapter
//! - `consecutive_failure_limit` navigation failures in a row end the collection

mod stats;
mod summary;

pub use stats::{RunStats, StatsSnapshot};
pub use summary::{
    ChapterOutcome, ChapterResult, Collection, CollectionSummary, RunSummary, StopReason, WorkUnit,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{AnalysisCache, ChapterKey};
use crate::collaborators::{DocumentCompiler, ExpectedCountProvider};
use crate::completeness::{CompletenessReport, analyze};
use crate::config::EngineConfig;
use crate::error::{ChapterError, EngineError, FailureStage};
use crate::fallback::try_in_order;
use crate::fetcher::{FetchSummary, IncrementalFetcher};
use crate::layout::chapter_dir;
use crate::load::ExhaustiveLoader;
use crate::local::scan_local_state;
use crate::locator::LocatorTemplate;
use crate::navigator::ChapterNavigator;
use crate::retry::{ErrorClass, RetryDecision, classify_error};
use crate::session::{RenderSession, SessionLease, SessionPool};

/// A chapter attempt that reached an analysed verdict.
struct AttemptSuccess {
    title: Option<String>,
    expected_count: Option<u32>,
    report: CompletenessReport,
    fetch: FetchSummary,
}

/// Coordinates collection workers over a shared session pool.
#[derive(Clone)]
pub struct Orchestrator {
    pool: Arc<SessionPool>,
    config: Arc<EngineConfig>,
    locator: LocatorTemplate,
    output_dir: PathBuf,
    navigator: ChapterNavigator,
    loader: ExhaustiveLoader,
    fetcher: IncrementalFetcher,
    cache: Arc<AnalysisCache>,
    stats: Arc<RunStats>,
    count_provider: Option<Arc<dyn ExpectedCountProvider>>,
    compiler: Option<Arc<dyn DocumentCompiler>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pool", &self.pool)
            .field("locator", &self.locator.as_str())
            .field("output_dir", &self.output_dir)
            .field("cached_reports", &self.cache.len())
            .field("count_provider", &self.count_provider.is_some())
            .field("compiler", &self.compiler.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator writing under `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` fails validation.
    #[instrument(level = "debug", skip_all, fields(pool_size = pool.size()))]
    pub fn new(
        pool: Arc<SessionPool>,
        config: EngineConfig,
        locator: LocatorTemplate,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let output_dir = output_dir.into();
        debug!(
            max_attempts = config.max_attempts,
            min_valid_size = config.min_valid_size,
            stable_threshold = config.stable_threshold,
            max_rounds = config.max_rounds,
            "creating orchestrator"
        );
        Ok(Self {
            navigator: ChapterNavigator::new(),
            loader: ExhaustiveLoader::new(config.load_params()),
            fetcher: IncrementalFetcher::new(config.fetch_params()),
            cache: Arc::new(AnalysisCache::new(config.cache_ttl)),
            stats: Arc::new(RunStats::new()),
            config: Arc::new(config),
            pool,
            locator,
            output_dir,
            count_provider: None,
            compiler: None,
        })
    }

    /// Adds a provider whose decoded counts corroborate the live count.
    #[must_use]
    pub fn with_count_provider(mut self, provider: Arc<dyn ExpectedCountProvider>) -> Self {
        self.count_provider = Some(provider);
        self
    }

    /// Adds a compiler invoked for every complete chapter.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn DocumentCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Shares an existing analysis cache (for example across runs in one process).
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<AnalysisCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Live counters of the current run.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Processes every collection and summarises the run.
    ///
    /// Never fails: chapter failures are recorded in the summary and pool
    /// exhaustion lists the collections that were not started.
    #[instrument(skip(self, collections), fields(collections = collections.len(), pool_size = self.pool.size()))]
    pub async fn run(&self, collections: Vec<Collection>) -> RunSummary {
        info!("starting run");
        let sweeper = self.spawn_cache_sweeper();
        let mut tasks: JoinSet<(usize, CollectionSummary)> = JoinSet::new();
        let mut finished = Vec::new();
        let mut pool_exhausted = Vec::new();

        let mut pending = collections.into_iter().enumerate();
        while let Some((position, collection)) = pending.next() {
            while self.pool.busy_count() >= self.pool.size() {
                match tasks.join_next().await {
                    Some(joined) => collect_finished(joined, &mut finished),
                    None => break,
                }
            }

            match self.pool.acquire(self.config.acquire_timeout).await {
                Ok(lease) => {
                    let this = self.clone();
                    tasks.spawn(async move {
                        (position, this.process_collection(collection, lease).await)
                    });
                }
                Err(pool_error) => {
                    error!(
                        collection = %collection.id,
                        error = %pool_error,
                        "session pool exhausted, not starting remaining collections"
                    );
                    pool_exhausted.push(collection.id);
                    pool_exhausted.extend(pending.by_ref().map(|(_, c)| c.id));
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            collect_finished(joined, &mut finished);
        }
        sweeper.abort();

        finished.sort_by_key(|(position, _)| *position);
        let summary = RunSummary {
            collections: finished.into_iter().map(|(_, summary)| summary).collect(),
            pool_exhausted,
            stats: self.stats.snapshot(),
        };
        info!(
            complete = summary.stats.chapters_complete,
            partial = summary.stats.chapters_partial,
            failed = summary.stats.chapters_failed,
            not_found = summary.stats.chapters_not_found,
            downloaded = summary.stats.items_downloaded,
            retried = summary.stats.retried,
            "run complete"
        );
        summary
    }

    fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let period = self.config.cache_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.evict_expired();
            }
        })
    }

    #[instrument(skip(self, collection, lease), fields(collection = %collection.id, session_id = lease.id()))]
    async fn process_collection(
        &self,
        collection: Collection,
        lease: SessionLease,
    ) -> CollectionSummary {
        let session = lease.session();
        let limit = self.config.consecutive_failure_limit;
        let cap = self.config.max_chapters;
        let mut chapters = Vec::new();
        let mut consecutive_failures = 0_u32;
        let mut walked = 0_u32;
        let mut index = collection.first_chapter;

        info!(
            first = collection.first_chapter,
            last = ?collection.last_chapter,
            "processing collection"
        );

        let stop_reason = loop {
            match collection.last_chapter {
                Some(last) if index > last => break StopReason::RangeExhausted,
                None if walked >= cap => break StopReason::ChapterCap { max_chapters: cap },
                _ => {}
            }

            let result = self.process_chapter(session, &collection, index).await;
            self.record(&result);
            if result.outcome.is_navigation_failure() {
                consecutive_failures += 1;
            } else {
                consecutive_failures = 0;
            }
            chapters.push(result);
            walked += 1;

            if consecutive_failures >= limit {
                info!(
                    consecutive_failures,
                    last_chapter = index,
                    "consecutive navigation failures, assuming end of collection"
                );
                break StopReason::EndOfCollection {
                    consecutive_failures,
                };
            }
            index = match index.checked_add(1) {
                Some(next) => next,
                None => break StopReason::RangeExhausted,
            };
        };

        lease.release();
        let summary = CollectionSummary {
            collection_id: collection.id,
            name: collection.name,
            chapters,
            stop_reason,
        };
        info!(
            complete = summary.complete_count(),
            partial = summary.partial_count(),
            failed = summary.failed_count(),
            not_found = summary.not_found_count(),
            missing_items = summary.missing_items(),
            "collection finished"
        );
        summary
    }

    fn record(&self, result: &ChapterResult) {
        match &result.outcome {
            ChapterOutcome::Complete { fetch, .. } => {
                self.stats.increment_complete();
                self.stats.add_items(fetch.downloaded, fetch.failed_count());
            }
            ChapterOutcome::Partial { fetch, .. } => {
                self.stats.increment_partial();
                self.stats.add_items(fetch.downloaded, fetch.failed_count());
            }
            ChapterOutcome::NotFound => self.stats.increment_not_found(),
            ChapterOutcome::Failed { .. } => self.stats.increment_failed(),
        }
    }

    /// Runs one chapter to a verdict, retrying per policy.
    #[instrument(skip(self, session, collection), fields(collection = %collection.id))]
    async fn process_chapter(
        &self,
        session: &dyn RenderSession,
        collection: &Collection,
        index: u32,
    ) -> ChapterResult {
        let unit = WorkUnit {
            parent_id: collection.id.clone(),
            index,
            locator: self.locator.render(&collection.id, index),
        };
        let dir = chapter_dir(&self.output_dir, &collection.name, index);
        let key = ChapterKey::new(&unit.parent_id, index);

        if let Some(result) = self.cached_result(&key, &dir).await {
            return result;
        }

        let policy = self.config.retry_policy();
        let no_content_limit = self.config.no_content_attempts.min(policy.max_attempts());
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            debug!(attempt, locator = %unit.locator, "attempting chapter");

            let error = match self.attempt_chapter(session, &unit, &dir).await {
                Ok(success) => return self.finish_chapter(&key, &dir, attempt, success).await,
                Err(error) => error,
            };

            if error.is_no_valid_content() && attempt >= no_content_limit {
                info!(attempt, error = %error, "no valid content, treating chapter as not found");
                return ChapterResult::bare(index, attempt, ChapterOutcome::NotFound);
            }

            let class = classify_error(&error);
            match policy.should_retry(class, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying chapter"
                    );
                    self.stats.increment_retried();
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if class == ErrorClass::NotFound {
                        debug!(error = %error, "chapter not found");
                        return ChapterResult::bare(index, attempt, ChapterOutcome::NotFound);
                    }
                    warn!(
                        error = %error,
                        attempts = attempt,
                        %reason,
                        "chapter failed after all attempts"
                    );
                    return ChapterResult::bare(
                        index,
                        attempt,
                        ChapterOutcome::Failed {
                            class,
                            stage: error.stage(),
                            error: error.to_string(),
                        },
                    );
                }
            }
        }
    }

    /// A cached complete verdict, when the disk still matches it.
    async fn cached_result(&self, key: &ChapterKey, dir: &Path) -> Option<ChapterResult> {
        let report = self.cache.get(key)?;
        if !report.is_complete() {
            return None;
        }
        let local = scan_local_state(dir, self.config.min_valid_size).await.ok()?;
        if local.count() != report.local_count {
            debug!(
                cached = report.local_count,
                on_disk = local.count(),
                "cached analysis is stale"
            );
            self.cache.invalidate(key);
            return None;
        }
        debug!(chapter = key.chapter, "using cached analysis");
        self.stats.increment_cache_hits();
        Some(ChapterResult::bare(
            key.chapter,
            0,
            ChapterOutcome::Complete {
                report,
                fetch: FetchSummary::default(),
                cached: true,
            },
        ))
    }

    /// One pass: navigate, load, reconcile, fetch, reconcile again.
    async fn attempt_chapter(
        &self,
        session: &dyn RenderSession,
        unit: &WorkUnit,
        dir: &Path,
    ) -> Result<AttemptSuccess, ChapterError> {
        let title = self
            .navigator
            .navigate(session, &unit.locator)
            .await
            .into_result()?;

        let lenient = self.config.lenient_policy();
        let remote_count = match self.loader.run(session).await {
            // A page that settles with no valid element has no content, whatever is on disk.
            Ok(outcome) if outcome.remote_count == 0 => {
                return Err(ChapterError::NoValidContent {
                    locator: unit.locator.clone(),
                });
            }
            Ok(outcome) => outcome.remote_count,
            Err(load_error) => {
                warn!(error = %load_error, "exhaustive load failed");
                let local = scan_local_state(dir, self.config.min_valid_size)
                    .await
                    .map_err(|e| ChapterError::io(dir, e))?;
                let report = analyze(&local, None, &lenient);
                if !report.is_complete() {
                    return Err(ChapterError::session(FailureStage::Load, load_error));
                }
                warn!(
                    local_count = report.local_count,
                    tolerated_gaps = ?report.tolerated_gaps,
                    "no remote count; accepting local items under the lenient policy"
                );
                return Ok(AttemptSuccess {
                    title,
                    expected_count: None,
                    report,
                    fetch: FetchSummary::default(),
                });
            }
        };

        let local = scan_local_state(dir, self.config.min_valid_size)
            .await
            .map_err(|e| ChapterError::io(dir, e))?;

        let expected_count = self.corroborate(session, remote_count).await;
        let report = analyze(&local, Some(remote_count), &lenient);
        debug!(
            remote_count,
            local_count = report.local_count,
            missing = report.missing_count(),
            status = ?report.status,
            "chapter analysed"
        );
        if report.is_complete() {
            return Ok(AttemptSuccess {
                title,
                expected_count,
                report,
                fetch: FetchSummary::default(),
            });
        }

        let fetch = self
            .fetcher
            .fetch_missing(session, dir, &report.missing_indices)
            .await
            .map_err(|e| ChapterError::io(dir, e))?;
        let local = scan_local_state(dir, self.config.min_valid_size)
            .await
            .map_err(|e| ChapterError::io(dir, e))?;
        let report = analyze(&local, Some(remote_count), &lenient);

        Ok(AttemptSuccess {
            title,
            expected_count,
            report,
            fetch,
        })
    }

    async fn finish_chapter(
        &self,
        key: &ChapterKey,
        dir: &Path,
        attempts: u32,
        success: AttemptSuccess,
    ) -> ChapterResult {
        let AttemptSuccess {
            title,
            expected_count,
            report,
            fetch,
        } = success;
        self.cache.insert(key.clone(), report.clone());

        let (mut compiled, mut compile_error) = (None, None);
        let outcome = if report.is_complete() {
            if let Some(compiler) = &self.compiler {
                match compiler.compile(dir).await {
                    Ok(path) => {
                        info!(artifact = %path.display(), "chapter compiled");
                        compiled = Some(path);
                    }
                    Err(e) => {
                        warn!(error = %e, "document compilation failed");
                        compile_error = Some(e.to_string());
                    }
                }
            }
            info!(
                items = report.local_count,
                downloaded = fetch.downloaded,
                lenient = report.lenient,
                "chapter complete"
            );
            ChapterOutcome::Complete {
                report,
                fetch,
                cached: false,
            }
        } else {
            warn!(
                missing = report.missing_count(),
                downloaded = fetch.downloaded,
                failed_items = fetch.failed_count(),
                "chapter still incomplete after fetch"
            );
            ChapterOutcome::Partial { report, fetch }
        };

        ChapterResult {
            index: key.chapter,
            title,
            attempts,
            expected_count,
            compiled,
            compile_error,
            outcome,
        }
    }

    /// Asks the expected-count provider, trying each configured key in order.
    async fn corroborate(&self, session: &dyn RenderSession, live_count: u32) -> Option<u32> {
        let provider = self.count_provider.as_ref()?;
        match try_in_order(&self.config.count_keys, |key| {
            provider.expected_count(session, key)
        })
        .await
        {
            Ok(expected) => {
                if expected != live_count {
                    warn!(
                        expected,
                        live_count, "decoded count disagrees with live count; keeping live count"
                    );
                }
                Some(expected)
            }
            Err(aggregate) => {
                debug!(error = %aggregate, "expected count unavailable");
                None
            }
        }
    }
}

fn collect_finished(
    joined: Result<(usize, CollectionSummary), JoinError>,
    finished: &mut Vec<(usize, CollectionSummary)>,
) {
    match joined {
        Ok(entry) => finished.push(entry),
        // A panicked worker already released its lease on unwind.
        Err(join_error) => warn!(error = %join_error, "collection task panicked"),
    }
}
