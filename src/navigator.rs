//! Chapter navigation.
//!
//! [`ChapterNavigator`] drives a session to a chapter's locator and checks that
//! the rendered page actually carries content. Status handling:
//!
//! | Status | Result |
//! |--------|--------|
//! | 404, 410 | [`NavigationError::NotFound`] (terminal for the chapter) |
//! | other >= 400 | [`NavigationError::HttpError`] (retryable) |
//! | success without content markers | [`NavigationError::NoValidContent`] |

use thiserror::Error;
use tracing::{debug, instrument};

use crate::session::{RenderSession, SessionError};

/// Why a chapter could not be navigated to.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// The chapter does not exist. Expected at collection boundaries.
    #[error("chapter not found at {locator}")]
    NotFound {
        /// Locator that was loaded.
        locator: String,
    },

    /// The remote answered with an error status.
    #[error("HTTP {status} loading {locator}")]
    HttpError {
        /// Locator that was loaded.
        locator: String,
        /// Response status.
        status: u16,
    },

    /// The page loaded but carries no content markers.
    #[error("no content markers found at {locator}")]
    NoValidContent {
        /// Locator that was loaded.
        locator: String,
    },

    /// The session itself failed while loading.
    #[error("session failed loading {locator}: {source}")]
    Session {
        /// Locator that was loaded.
        locator: String,
        /// Underlying session failure.
        #[source]
        source: SessionError,
    },
}

impl NavigationError {
    /// Locator the failure refers to.
    #[must_use]
    pub fn locator(&self) -> &str {
        match self {
            Self::NotFound { locator }
            | Self::HttpError { locator, .. }
            | Self::NoValidContent { locator }
            | Self::Session { locator, .. } => locator,
        }
    }
}

/// Outcome of one navigation.
#[derive(Debug)]
pub struct NavigationResult {
    /// Whether the page loaded with content markers.
    pub success: bool,
    /// Page title, when the session reported one.
    pub title: Option<String>,
    /// Failure, when `success` is false.
    pub error: Option<NavigationError>,
}

impl NavigationResult {
    fn succeeded(title: Option<String>) -> Self {
        Self {
            success: true,
            title,
            error: None,
        }
    }

    fn failed(error: NavigationError) -> Self {
        Self {
            success: false,
            title: None,
            error: Some(error),
        }
    }

    /// Converts into a `Result`, yielding the title on success.
    ///
    /// # Errors
    ///
    /// Returns the recorded [`NavigationError`] when navigation failed.
    pub fn into_result(self) -> Result<Option<String>, NavigationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.title),
        }
    }
}

/// Stateless navigator; the session carries the location.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterNavigator;

impl ChapterNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Loads `locator` in `session` and validates the response.
    #[instrument(level = "debug", skip(self, session))]
    pub async fn navigate(&self, session: &dyn RenderSession, locator: &str) -> NavigationResult {
        let response = match session.load(locator).await {
            Ok(response) => response,
            Err(source) => {
                return NavigationResult::failed(NavigationError::Session {
                    locator: locator.to_string(),
                    source,
                });
            }
        };

        match response.status {
            404 | 410 => {
                debug!(status = response.status, "chapter not found");
                return NavigationResult::failed(NavigationError::NotFound {
                    locator: locator.to_string(),
                });
            }
            status if status >= 400 => {
                debug!(status, "chapter load returned error status");
                return NavigationResult::failed(NavigationError::HttpError {
                    locator: locator.to_string(),
                    status,
                });
            }
            _ => {}
        }

        match session.has_content_marker().await {
            Ok(true) => NavigationResult::succeeded(response.title),
            Ok(false) => NavigationResult::failed(NavigationError::NoValidContent {
                locator: locator.to_string(),
            }),
            Err(source) => NavigationResult::failed(NavigationError::Session {
                locator: locator.to_string(),
                source,
            }),
        }
    }
}
