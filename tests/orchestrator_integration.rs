//! Integration tests for the orchestrator over scripted in-memory sessions.
//!
//! These cover the end-to-end chapter flow: navigation, exhaustive loading,
//! reconciliation with the disk, incremental fetching, retries and the
//! end-of-collection heuristic.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chapter_fetcher::{
    ChapterOutcome, CollaboratorError, Collection, CompletenessStatus, DocumentCompiler,
    ErrorClass, ExpectedCountProvider, FailureStage, RenderSession, StopReason,
};
use tempfile::TempDir;

mod support;
use support::{
    ConcurrencyTracker, MIN_VALID_SIZE, MockChapter, MockSession, PAYLOAD_SIZE, fast_config,
    locator, orchestrator, seed_items, valid_indices_on_disk,
};

fn single_chapter(id: &str, chapter: u32) -> Collection {
    Collection::new(id).with_range(chapter, Some(chapter))
}

// ==================== Reconciliation Scenarios ====================

#[tokio::test]
async fn test_complete_chapter_on_disk_fetches_nothing() {
    let dir = TempDir::new().unwrap();
    seed_items(dir.path(), "s1", 1, &(1..=10).collect::<Vec<_>>(), 512);
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::new(10)));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    match &chapter.outcome {
        ChapterOutcome::Complete { report, fetch, cached } => {
            assert_eq!(report.local_count, 10);
            assert_eq!(report.remote_count, 10);
            assert!(report.missing_indices.is_empty());
            assert_eq!(fetch.downloaded, 0);
            assert!(!cached);
        }
        other => panic!("expected complete chapter, got {other:?}"),
    }
    assert_eq!(session.extract_count(), 0, "nothing should be fetched");
    assert_eq!(chapter.attempts, 1);
    assert!(!summary.has_failures());
}

#[tokio::test]
async fn test_single_gap_fetches_only_the_missing_item() {
    let dir = TempDir::new().unwrap();
    seed_items(dir.path(), "s1", 1, &[1, 2, 3, 5], 512);
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::new(5)));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let outcome = &summary.collections[0].chapters[0].outcome;
    assert!(matches!(outcome, ChapterOutcome::Complete { .. }), "{outcome:?}");
    assert_eq!(outcome.downloaded_items(), 1);
    assert_eq!(session.extract_count(), 1);
    assert_eq!(
        valid_indices_on_disk(dir.path(), "s1", 1, MIN_VALID_SIZE),
        (1..=5).collect()
    );
}

#[tokio::test]
async fn test_undersized_item_is_treated_as_missing_and_replaced() {
    let dir = TempDir::new().unwrap();
    seed_items(dir.path(), "s1", 1, &[1, 2, 3, 5], 512);
    seed_items(dir.path(), "s1", 1, &[4], 10);
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::new(5)));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let outcome = &summary.collections[0].chapters[0].outcome;
    assert!(matches!(outcome, ChapterOutcome::Complete { .. }), "{outcome:?}");
    assert_eq!(outcome.downloaded_items(), 1);
    let replaced = support::chapter_path(dir.path(), "s1", 1).join("4-page.png");
    assert_eq!(
        std::fs::metadata(replaced).unwrap().len(),
        PAYLOAD_SIZE as u64
    );
}

#[tokio::test]
async fn test_empty_chapter_is_fully_downloaded() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(
        MockSession::new().with_chapter("s1", 1, MockChapter::new(7).per_scroll(3)),
    );
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    assert_eq!(summary.stats.items_downloaded, 7);
    assert_eq!(summary.stats.chapters_complete, 1);
    assert_eq!(
        valid_indices_on_disk(dir.path(), "s1", 1, MIN_VALID_SIZE).len(),
        7
    );
}

#[tokio::test]
async fn test_remote_error_elements_are_not_counted() {
    let dir = TempDir::new().unwrap();
    seed_items(dir.path(), "s1", 1, &[1, 2, 3, 4, 5], 512);
    let session = Arc::new(MockSession::new().with_chapter(
        "s1",
        1,
        MockChapter::new(6).remote_errors(&[6]),
    ));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    match &summary.collections[0].chapters[0].outcome {
        ChapterOutcome::Complete { report, .. } => assert_eq!(report.remote_count, 5),
        other => panic!("expected complete chapter, got {other:?}"),
    }
    assert_eq!(session.extract_count(), 0);
}

#[tokio::test]
async fn test_failed_items_leave_chapter_partial() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_chapter(
        "s1",
        1,
        MockChapter::new(4).failing_items(&[3]),
    ));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    match &chapter.outcome {
        ChapterOutcome::Partial { report, fetch } => {
            assert_eq!(report.status, CompletenessStatus::PartialMissing);
            assert_eq!(report.missing_indices, [3].into_iter().collect());
            assert_eq!(fetch.downloaded, 3);
            assert_eq!(fetch.failed_count(), 1);
        }
        other => panic!("expected partial chapter, got {other:?}"),
    }
    assert_eq!(chapter.attempts, 1, "a partial chapter is not retried");
    assert_eq!(summary.stats.items_failed, 1);
    assert!(summary.has_failures());
}

#[tokio::test]
async fn test_lenient_fallback_accepts_near_complete_chapter_without_remote_count() {
    let dir = TempDir::new().unwrap();
    let mut indices: Vec<u32> = (1..=12).collect();
    indices.retain(|i| *i != 7);
    seed_items(dir.path(), "s1", 1, &indices, 512);
    let session = Arc::new(MockSession::new().with_chapter(
        "s1",
        1,
        MockChapter::new(12).scroll_fails(),
    ));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    match &summary.collections[0].chapters[0].outcome {
        ChapterOutcome::Complete { report, .. } => {
            assert!(report.lenient);
            assert_eq!(report.tolerated_gaps, [7].into_iter().collect());
        }
        other => panic!("expected lenient complete chapter, got {other:?}"),
    }
    assert_eq!(session.extract_count(), 0);
}

#[tokio::test]
async fn test_load_failure_without_enough_local_items_fails_the_chapter() {
    let dir = TempDir::new().unwrap();
    seed_items(dir.path(), "s1", 1, &[1, 2], 512);
    let session = Arc::new(MockSession::new().with_chapter(
        "s1",
        1,
        MockChapter::new(12).scroll_fails(),
    ));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    match &chapter.outcome {
        ChapterOutcome::Failed { class, stage, .. } => {
            assert_eq!(*class, ErrorClass::NetworkError);
            assert_eq!(*stage, FailureStage::Load);
        }
        other => panic!("expected failed chapter, got {other:?}"),
    }
    assert_eq!(chapter.attempts, 3);
}

// ==================== Idempotence ====================

#[tokio::test]
async fn test_second_run_downloads_nothing() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_collection("s1", 3, 5));
    let collections = || vec![Collection::new("s1").with_range(1, Some(3))];

    let (first, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());
    let first_summary = first.run(collections()).await;
    assert_eq!(first_summary.stats.items_downloaded, 15);
    let extracts_after_first = session.extract_count();

    let (second, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());
    let second_summary = second.run(collections()).await;

    assert_eq!(second_summary.stats.items_downloaded, 0);
    assert_eq!(second_summary.stats.chapters_complete, 3);
    assert_eq!(session.extract_count(), extracts_after_first);
}

#[tokio::test]
async fn test_cached_complete_chapter_skips_rendering() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_collection("s1", 1, 4));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    orch.run(vec![single_chapter("s1", 1)]).await;
    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    match &summary.collections[0].chapters[0].outcome {
        ChapterOutcome::Complete { cached, .. } => assert!(cached),
        other => panic!("expected cached complete chapter, got {other:?}"),
    }
    assert_eq!(session.load_count(&locator("s1", 1)), 1);
    assert_eq!(orch.stats().cache_hits(), 1);
}

// ==================== Retry and Termination ====================

#[tokio::test]
async fn test_server_errors_are_retried_up_to_max_attempts() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::with_status(503)));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    assert_eq!(chapter.attempts, 3);
    assert!(matches!(
        chapter.outcome,
        ChapterOutcome::Failed {
            class: ErrorClass::NetworkError,
            stage: FailureStage::Navigation,
            ..
        }
    ));
    assert_eq!(session.load_count(&locator("s1", 1)), 3);
    assert_eq!(summary.stats.retried, 2);
}

#[tokio::test]
async fn test_transient_timeouts_recover_within_attempt_budget() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_chapter(
        "s1",
        1,
        MockChapter::new(3).transient_load_failures(2),
    ));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    assert!(matches!(chapter.outcome, ChapterOutcome::Complete { .. }));
    assert_eq!(chapter.attempts, 3);
    assert_eq!(summary.stats.items_downloaded, 3);
}

#[tokio::test]
async fn test_missing_chapter_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new());
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 4)]).await;

    assert!(matches!(
        summary.collections[0].chapters[0].outcome,
        ChapterOutcome::NotFound
    ));
    assert_eq!(session.load_count(&locator("s1", 4)), 1);
}

#[tokio::test]
async fn test_page_without_content_becomes_not_found() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::new(0)));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    assert!(matches!(chapter.outcome, ChapterOutcome::NotFound));
    assert_eq!(chapter.attempts, 2);
}

#[tokio::test]
async fn test_all_errored_page_is_not_found_even_with_local_items() {
    let dir = TempDir::new().unwrap();
    let indices: Vec<u32> = (1..=12).collect();
    seed_items(dir.path(), "s1", 1, &indices, 512);
    let session = Arc::new(MockSession::new().with_chapter(
        "s1",
        1,
        MockChapter::new(12).per_scroll(12).remote_errors(&indices),
    ));
    let mut config = fast_config(1);
    config.consecutive_failure_limit = 1;
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], config, dir.path());

    let summary = orch.run(vec![Collection::new("s1")]).await;

    let chapter = &summary.collections[0].chapters[0];
    assert!(
        matches!(chapter.outcome, ChapterOutcome::NotFound),
        "a page whose count settles at zero must not be accepted leniently, got {:?}",
        chapter.outcome
    );
    assert_eq!(chapter.attempts, 2);
    assert_eq!(session.extract_count(), 0);
    assert_eq!(summary.stats.chapters_complete, 0);
}

#[tokio::test]
async fn test_open_ended_collection_stops_after_consecutive_missing_chapters() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_collection("s1", 2, 3));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![Collection::new("s1")]).await;

    let collection = &summary.collections[0];
    assert_eq!(collection.complete_count(), 2);
    assert_eq!(collection.not_found_count(), 3);
    assert_eq!(
        collection.stop_reason,
        StopReason::EndOfCollection {
            consecutive_failures: 3
        }
    );
    let walked: Vec<u32> = collection.chapters.iter().map(|c| c.index).collect();
    assert_eq!(walked, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_gap_in_chapters_resets_failure_streak() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(
        MockSession::new()
            .with_chapter("s1", 1, MockChapter::new(2))
            .with_chapter("s1", 3, MockChapter::new(2)),
    );
    let mut config = fast_config(1);
    config.consecutive_failure_limit = 2;
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], config, dir.path());

    let summary = orch.run(vec![Collection::new("s1")]).await;

    let walked: Vec<u32> = summary.collections[0].chapters.iter().map(|c| c.index).collect();
    assert_eq!(walked, [1, 2, 3, 4, 5]);
    assert_eq!(summary.collections[0].complete_count(), 2);
}

// ==================== Pool and Concurrency ====================

#[tokio::test]
async fn test_more_collections_than_sessions_all_complete() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(
        MockSession::new()
            .with_collection("a", 2, 2)
            .with_collection("b", 2, 2)
            .with_collection("c", 2, 2),
    );
    let (orch, pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch
        .run(
            ["a", "b", "c"]
                .iter()
                .map(|id| Collection::new(*id).with_range(1, Some(2)))
                .collect(),
        )
        .await;

    assert!(summary.pool_exhausted.is_empty());
    let ids: Vec<&str> = summary
        .collections
        .iter()
        .map(|c| c.collection_id.as_str())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert!(summary.collections.iter().all(|c| c.complete_count() == 2));
    assert_eq!(pool.busy_count(), 0);
}

#[tokio::test]
async fn test_concurrent_collections_never_exceed_pool_size() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(ConcurrencyTracker::default());
    let sessions: Vec<Arc<MockSession>> = (0..2)
        .map(|_| {
            let mut session = MockSession::new();
            for id in ["a", "b", "c", "d"] {
                session = session.with_collection(id, 2, 2);
            }
            Arc::new(session.with_load_delay(Duration::from_millis(20), Arc::clone(&tracker)))
        })
        .collect();
    let (orch, pool) = orchestrator(&sessions, fast_config(2), dir.path());

    let summary = orch
        .run(
            ["a", "b", "c", "d"]
                .iter()
                .map(|id| Collection::new(*id).with_range(1, Some(2)))
                .collect(),
        )
        .await;

    assert!(tracker.max_observed() <= 2);
    assert_eq!(summary.stats.chapters_complete, 8);
    assert!(sessions.iter().all(|s| !s.loads().is_empty()), "both sessions used");
    assert_eq!(pool.busy_count(), 0);
}

#[tokio::test]
async fn test_chapters_are_walked_in_order_on_one_session() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_collection("s1", 4, 1));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    orch.run(vec![Collection::new("s1").with_range(1, Some(4))]).await;

    let expected: Vec<String> = (1..=4).map(|c| locator("s1", c)).collect();
    assert_eq!(session.loads(), expected);
}

#[tokio::test]
async fn test_pool_close_closes_every_session() {
    let dir = TempDir::new().unwrap();
    let sessions = vec![Arc::new(MockSession::new()), Arc::new(MockSession::new())];
    let (_orch, pool) = orchestrator(&sessions, fast_config(2), dir.path());

    pool.close().await;

    assert!(sessions.iter().all(|s| s.close_count() == 1));
}

// ==================== Collaborators ====================

struct KeyedCounts;

#[async_trait]
impl ExpectedCountProvider for KeyedCounts {
    async fn expected_count(
        &self,
        _session: &dyn RenderSession,
        key: &str,
    ) -> Result<u32, CollaboratorError> {
        match key {
            "good" => Ok(9),
            other => Err(CollaboratorError::new(format!("cannot decode with {other}"))),
        }
    }
}

#[derive(Default)]
struct RecordingCompiler {
    compiled: Mutex<Vec<PathBuf>>,
    fail: bool,
}

#[async_trait]
impl DocumentCompiler for RecordingCompiler {
    async fn compile(&self, chapter_dir: &Path) -> Result<PathBuf, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::new("converter crashed"));
        }
        self.compiled.lock().unwrap().push(chapter_dir.to_path_buf());
        Ok(chapter_dir.with_extension("pdf"))
    }
}

#[tokio::test]
async fn test_expected_count_is_recorded_but_live_count_wins() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::new(4)));
    let mut config = fast_config(1);
    config.count_keys = vec!["bad".to_string(), "good".to_string()];
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], config, dir.path());
    let orch = orch.with_count_provider(Arc::new(KeyedCounts));

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    assert_eq!(chapter.expected_count, Some(9));
    match &chapter.outcome {
        ChapterOutcome::Complete { report, .. } => assert_eq!(report.remote_count, 4),
        other => panic!("expected complete chapter, got {other:?}"),
    }
}

#[tokio::test]
async fn test_compiler_runs_for_complete_chapters_only() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(
        MockSession::new()
            .with_chapter("s1", 1, MockChapter::new(2))
            .with_chapter("s1", 2, MockChapter::new(3).failing_items(&[1])),
    );
    let compiler = Arc::new(RecordingCompiler::default());
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());
    let orch = orch.with_compiler(Arc::clone(&compiler) as Arc<dyn DocumentCompiler>);

    let summary = orch
        .run(vec![Collection::new("s1").with_range(1, Some(2))])
        .await;

    let chapters = &summary.collections[0].chapters;
    assert!(chapters[0].compiled.is_some());
    assert!(chapters[1].compiled.is_none());
    assert_eq!(
        compiler.compiled.lock().unwrap().as_slice(),
        [support::chapter_path(dir.path(), "s1", 1)]
    );
}

#[tokio::test]
async fn test_compiler_failure_does_not_fail_the_chapter() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_chapter("s1", 1, MockChapter::new(2)));
    let compiler = Arc::new(RecordingCompiler {
        fail: true,
        ..RecordingCompiler::default()
    });
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());
    let orch = orch.with_compiler(compiler);

    let summary = orch.run(vec![single_chapter("s1", 1)]).await;

    let chapter = &summary.collections[0].chapters[0];
    assert!(matches!(chapter.outcome, ChapterOutcome::Complete { .. }));
    assert_eq!(chapter.compile_error.as_deref(), Some("converter crashed"));
}

// ==================== Summary Serialization ====================

#[tokio::test]
async fn test_run_summary_serializes_to_json() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(MockSession::new().with_collection("s1", 1, 2));
    let (orch, _pool) = orchestrator(&[Arc::clone(&session)], fast_config(1), dir.path());

    let summary = orch.run(vec![Collection::new("s1")]).await;
    let value = serde_json::to_value(&summary).unwrap();

    assert_eq!(value["collections"][0]["collection_id"], "s1");
    assert_eq!(value["collections"][0]["chapters"][0]["outcome"]["status"], "complete");
    assert_eq!(
        value["collections"][0]["stop_reason"]["reason"],
        "end_of_collection"
    );
    assert_eq!(value["stats"]["items_downloaded"], 2);
}
