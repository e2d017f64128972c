//! Rendering sessions.
//!
//! A [`RenderSession`] is one exclusive-use rendering context: it can load a
//! remote resource, report the content elements materialised so far, advance
//! its viewport to trigger lazy loading, and hand out the binary payload behind
//! a content element. The engine only talks to sessions through this trait;
//! a headless browser, a static HTTP renderer ([`HttpSession`]) or a test double
//! can sit behind it.
//!
//! Sessions are owned by a [`SessionPool`] and borrowed through a
//! [`SessionLease`] for the duration of one collection.

mod http;
mod pool;

pub use http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpSession};
pub use pool::{PoolError, SessionInfo, SessionLease, SessionPool, SharedSession};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a rendering session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation did not finish in time.
    #[error("session timed out while {operation}")]
    Timeout {
        /// What the session was doing.
        operation: String,
    },

    /// Transport failure reaching the remote resource.
    #[error("network error while {operation}: {message}")]
    Network {
        /// What the session was doing.
        operation: String,
        /// Underlying error text.
        message: String,
    },

    /// A content element the caller asked for is not materialised.
    #[error("no content element for item {index}")]
    ElementNotFound {
        /// Item index that was requested.
        index: u32,
    },

    /// The locator cannot be loaded by this session.
    #[error("invalid locator {locator}: {reason}")]
    InvalidLocator {
        /// Locator as given.
        locator: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Content was requested before any page was loaded.
    #[error("no page loaded in session")]
    NoPage,

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn network(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Response status of a page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    /// HTTP (or equivalent) status code.
    pub status: u16,
    /// Document title, when the page has one.
    pub title: Option<String>,
}

/// Index marker carried by a content element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMarker {
    /// A positive item index.
    Index(u32),
    /// The element carries an error marker instead of an index.
    Error,
}

/// One content element as currently rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentElement {
    /// Index marker of the element.
    pub marker: IndexMarker,
    /// Whether the element currently displays an error indicator.
    pub error_visible: bool,
}

impl ContentElement {
    /// Element that carries `index` and renders normally.
    #[must_use]
    pub fn loaded(index: u32) -> Self {
        Self {
            marker: IndexMarker::Index(index),
            error_visible: false,
        }
    }

    /// Element that carries `index` but shows an error indicator.
    #[must_use]
    pub fn failed(index: u32) -> Self {
        Self {
            marker: IndexMarker::Index(index),
            error_visible: true,
        }
    }

    /// Index of the element when it counts as genuine content.
    ///
    /// Elements with an error marker or a visible error indicator are neither
    /// present nor missing: they are remote load failures.
    #[must_use]
    pub fn content_index(&self) -> Option<u32> {
        match self.marker {
            IndexMarker::Index(index) if index > 0 && !self.error_visible => Some(index),
            _ => None,
        }
    }
}

/// Viewport position after a scroll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollPosition {
    /// Top of the viewport, in pixels.
    pub offset: u32,
    /// Viewport height, in pixels.
    pub viewport: u32,
    /// Total document height, in pixels.
    pub height: u32,
}

impl ScrollPosition {
    /// Pixels left below the viewport.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.height
            .saturating_sub(self.offset.saturating_add(self.viewport))
    }

    #[must_use]
    pub fn at_bottom(&self) -> bool {
        self.remaining() == 0
    }
}

/// Binary payload behind a content element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPayload {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// File extension suggested by the source, without a dot.
    pub extension: Option<String>,
}

/// One exclusive-use rendering context.
///
/// Methods take `&self`; implementations keep their mutable page state behind
/// interior locks. Exclusivity is guaranteed by the [`SessionPool`], not by
/// the borrow checker.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Loads the resource at `locator`, replacing the current page.
    async fn load(&self, locator: &str) -> Result<PageResponse, SessionError>;

    /// Content elements rendered so far.
    async fn content_elements(&self) -> Result<Vec<ContentElement>, SessionError>;

    /// Whether at least one structural content marker exists.
    async fn has_content_marker(&self) -> Result<bool, SessionError> {
        Ok(!self.content_elements().await?.is_empty())
    }

    /// Advances the viewport by `distance` pixels.
    async fn scroll_by(&self, distance: u32) -> Result<ScrollPosition, SessionError>;

    /// Jumps the viewport to the bottom of the document.
    async fn scroll_to_bottom(&self) -> Result<ScrollPosition, SessionError>;

    /// Extracts the payload of the element carrying item `index`.
    async fn extract_item(&self, index: u32) -> Result<ItemPayload, SessionError>;

    /// Releases the underlying rendering context. Called once at shutdown.
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}
