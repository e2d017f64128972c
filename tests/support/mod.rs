//! Shared helpers for integration tests.
//!
//! [`MockSession`] is a scriptable in-memory renderer. Chapters are registered
//! by locator (`mem://<collection>/<chapter>`); unknown locators answer 404.
//! Each scroll step reveals a few more elements, mimicking lazy loading.

#![allow(dead_code)]

pub mod socket_guard;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chapter_fetcher::layout::{chapter_dir, item_file_name};
use chapter_fetcher::{
    ContentElement, EngineConfig, ItemPayload, LocatorTemplate, Orchestrator, PageResponse,
    RenderSession, ScrollPosition, SessionError, SessionPool, SharedSession,
};

/// Pixel height of one mock element.
const ELEMENT_HEIGHT: u32 = 100;

pub const LOCATOR_TEMPLATE: &str = "mem://{collection}/{chapter}";

/// Size of payloads handed out by [`MockSession`].
pub const PAYLOAD_SIZE: usize = 256;

/// Minimum valid size used by [`fast_config`].
pub const MIN_VALID_SIZE: u64 = 64;

#[must_use]
pub fn locator(collection: &str, chapter: u32) -> String {
    format!("mem://{collection}/{chapter}")
}

/// Engine config with millisecond delays.
#[must_use]
pub fn fast_config(pool_size: usize) -> EngineConfig {
    EngineConfig {
        pool_size,
        min_valid_size: MIN_VALID_SIZE,
        stable_threshold: 2,
        max_rounds: 50,
        acquire_timeout: Duration::from_secs(10),
        acquire_poll_interval: Duration::from_millis(5),
        scroll_step_px: ELEMENT_HEIGHT,
        settle_interval: Duration::from_millis(1),
        batch_pause: Duration::from_millis(1),
        timeout_delay: Duration::from_millis(1),
        network_delay: Duration::from_millis(1),
        short_delay: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

/// Builds an orchestrator over `sessions`.
pub fn orchestrator(
    sessions: &[Arc<MockSession>],
    config: EngineConfig,
    output_dir: &Path,
) -> (Orchestrator, Arc<SessionPool>) {
    let shared: Vec<SharedSession> = sessions
        .iter()
        .map(|s| Arc::clone(s) as SharedSession)
        .collect();
    let pool = Arc::new(SessionPool::new(shared, config.acquire_poll_interval).unwrap());
    let template = LocatorTemplate::parse(LOCATOR_TEMPLATE).unwrap();
    let orchestrator =
        Orchestrator::new(Arc::clone(&pool), config, template, output_dir.to_path_buf()).unwrap();
    (orchestrator, pool)
}

/// Writes item files for `indices` with `size` bytes each.
pub fn seed_items(root: &Path, collection: &str, chapter: u32, indices: &[u32], size: usize) {
    let dir = chapter_dir(root, collection, chapter);
    std::fs::create_dir_all(&dir).unwrap();
    for &index in indices {
        std::fs::write(dir.join(item_file_name(index, "page", "png")), vec![7_u8; size]).unwrap();
    }
}

/// Item indices currently on disk with at least `min` bytes.
#[must_use]
pub fn valid_indices_on_disk(root: &Path, collection: &str, chapter: u32, min: u64) -> BTreeSet<u32> {
    let dir = chapter_dir(root, collection, chapter);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.metadata().map(|m| m.len() >= min).unwrap_or(false))
        .filter_map(|e| {
            chapter_fetcher::layout::parse_item_index(&e.file_name().to_string_lossy())
        })
        .collect()
}

#[must_use]
pub fn chapter_path(root: &Path, collection: &str, chapter: u32) -> PathBuf {
    chapter_dir(root, collection, chapter)
}

/// Scripted behaviour of one chapter page.
#[derive(Debug, Clone)]
pub struct MockChapter {
    status: u16,
    total: u32,
    per_scroll: u32,
    remote_errors: BTreeSet<u32>,
    failing_items: BTreeSet<u32>,
    transient_load_failures: u32,
    scroll_fails: bool,
}

impl MockChapter {
    /// A chapter with `total` items revealed two per scroll step.
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            status: 200,
            total,
            per_scroll: 2,
            remote_errors: BTreeSet::new(),
            failing_items: BTreeSet::new(),
            transient_load_failures: 0,
            scroll_fails: false,
        }
    }

    /// A chapter whose page answers `status` with no content.
    #[must_use]
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::new(0)
        }
    }

    #[must_use]
    pub fn per_scroll(mut self, per_scroll: u32) -> Self {
        self.per_scroll = per_scroll.max(1);
        self
    }

    /// Elements rendered with a visible error indicator.
    #[must_use]
    pub fn remote_errors(mut self, indices: &[u32]) -> Self {
        self.remote_errors = indices.iter().copied().collect();
        self
    }

    /// Items whose extraction always fails.
    #[must_use]
    pub fn failing_items(mut self, indices: &[u32]) -> Self {
        self.failing_items = indices.iter().copied().collect();
        self
    }

    /// The first `count` loads time out.
    #[must_use]
    pub fn transient_load_failures(mut self, count: u32) -> Self {
        self.transient_load_failures = count;
        self
    }

    /// Every scroll fails with a network error.
    #[must_use]
    pub fn scroll_fails(mut self) -> Self {
        self.scroll_fails = true;
        self
    }
}

#[derive(Debug)]
struct OpenPage {
    locator: String,
    revealed: u32,
}

/// Tracks how many sessions are inside `load` at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyTracker {
    #[must_use]
    pub fn max_observed(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scriptable in-memory [`RenderSession`].
#[derive(Debug, Default)]
pub struct MockSession {
    chapters: HashMap<String, MockChapter>,
    failures_left: Mutex<HashMap<String, u32>>,
    page: Mutex<Option<OpenPage>>,
    loads: Mutex<Vec<String>>,
    extracts: AtomicUsize,
    closed: AtomicU32,
    load_delay: Duration,
    tracker: Option<Arc<ConcurrencyTracker>>,
}

impl MockSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chapter(mut self, collection: &str, chapter: u32, script: MockChapter) -> Self {
        let key = locator(collection, chapter);
        self.failures_left
            .get_mut()
            .unwrap()
            .insert(key.clone(), script.transient_load_failures);
        self.chapters.insert(key, script);
        self
    }

    /// Registers chapters `1..=count` of `collection`, each with `items` items.
    #[must_use]
    pub fn with_collection(mut self, collection: &str, count: u32, items: u32) -> Self {
        for chapter in 1..=count {
            self = self.with_chapter(collection, chapter, MockChapter::new(items));
        }
        self
    }

    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration, tracker: Arc<ConcurrencyTracker>) -> Self {
        self.load_delay = delay;
        self.tracker = Some(tracker);
        self
    }

    /// Every locator loaded, in order.
    #[must_use]
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }

    #[must_use]
    pub fn load_count(&self, locator: &str) -> usize {
        self.loads.lock().unwrap().iter().filter(|l| *l == locator).count()
    }

    #[must_use]
    pub fn extract_count(&self) -> usize {
        self.extracts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    fn current_script(&self) -> Result<(MockChapter, u32), SessionError> {
        let page = self.page.lock().unwrap();
        let page = page.as_ref().ok_or(SessionError::NoPage)?;
        let script = self
            .chapters
            .get(&page.locator)
            .cloned()
            .unwrap_or_else(|| MockChapter::with_status(404));
        Ok((script, page.revealed))
    }

    fn reveal_more(&self) -> Result<ScrollPosition, SessionError> {
        let (script, _) = self.current_script()?;
        if script.scroll_fails {
            return Err(SessionError::network("scrolling", "connection reset"));
        }
        let mut page = self.page.lock().unwrap();
        let page = page.as_mut().ok_or(SessionError::NoPage)?;
        page.revealed = (page.revealed + script.per_scroll).min(script.total);
        Ok(ScrollPosition {
            offset: page.revealed * ELEMENT_HEIGHT,
            viewport: 0,
            height: script.total * ELEMENT_HEIGHT,
        })
    }
}

#[async_trait]
impl RenderSession for MockSession {
    async fn load(&self, locator: &str) -> Result<PageResponse, SessionError> {
        self.loads.lock().unwrap().push(locator.to_string());
        if let Some(tracker) = &self.tracker {
            tracker.enter();
            tokio::time::sleep(self.load_delay).await;
            tracker.exit();
        }

        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(locator)
                && *left > 0
            {
                *left -= 1;
                *self.page.lock().unwrap() = None;
                return Err(SessionError::timeout("loading page"));
            }
        }

        let script = self
            .chapters
            .get(locator)
            .cloned()
            .unwrap_or_else(|| MockChapter::with_status(404));
        let revealed = if script.status < 400 {
            script.per_scroll.min(script.total)
        } else {
            0
        };
        *self.page.lock().unwrap() = Some(OpenPage {
            locator: locator.to_string(),
            revealed,
        });
        Ok(PageResponse {
            status: script.status,
            title: (script.status < 400).then(|| format!("Page {locator}")),
        })
    }

    async fn content_elements(&self) -> Result<Vec<ContentElement>, SessionError> {
        let (script, revealed) = self.current_script()?;
        Ok((1..=revealed)
            .map(|index| {
                if script.remote_errors.contains(&index) {
                    ContentElement::failed(index)
                } else {
                    ContentElement::loaded(index)
                }
            })
            .collect())
    }

    async fn scroll_by(&self, _distance: u32) -> Result<ScrollPosition, SessionError> {
        self.reveal_more()
    }

    async fn scroll_to_bottom(&self) -> Result<ScrollPosition, SessionError> {
        self.reveal_more()
    }

    async fn extract_item(&self, index: u32) -> Result<ItemPayload, SessionError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        let (script, revealed) = self.current_script()?;
        if index == 0 || index > revealed || script.remote_errors.contains(&index) {
            return Err(SessionError::ElementNotFound { index });
        }
        if script.failing_items.contains(&index) {
            return Err(SessionError::network("fetching item", "HTTP 502"));
        }
        Ok(ItemPayload {
            bytes: vec![0xAB; PAYLOAD_SIZE],
            extension: Some("png".to_string()),
        })
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        *self.page.lock().unwrap() = None;
        Ok(())
    }
}
