//! Static HTTP renderer.
//!
//! [`HttpSession`] renders a page by fetching its HTML once and reading the
//! content elements straight from the markup. It performs no script execution,
//! so the document is always fully "scrolled": every scroll reports the bottom
//! and the exhaustive-load driver converges after its stability rounds.
//!
//! # Markup Convention
//!
//! - Every `<img>` with a `data-index` attribute is a content element
//! - `data-index="N"` (N > 0) is the index marker; any other value is an error marker
//! - `class="... load-error ..."` marks a visible error indicator
//! - `data-src` (preferred) or `src` is the item handle, resolved against the page URL

use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};
use url::Url;

use super::{
    ContentElement, IndexMarker, ItemPayload, PageResponse, RenderSession, ScrollPosition,
    SessionError,
};
use crate::user_agent::default_user_agent;

/// Default connect timeout for page and item requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default overall timeout for page and item requests.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Class name marking an element whose error indicator is displayed.
const ERROR_CLASS: &str = "load-error";

#[allow(clippy::expect_used)]
static ELEMENT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("img[data-index]").expect("element selector is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("title").expect("title selector is valid") // Static pattern, safe to panic
});

#[derive(Debug, Clone)]
struct RenderedElement {
    element: ContentElement,
    source: Option<Url>,
}

#[derive(Debug, Clone)]
struct RenderedPage {
    title: Option<String>,
    elements: Vec<RenderedElement>,
}

/// Rendering session backed by plain HTTP requests.
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    page: Mutex<Option<RenderedPage>>,
    closed: AtomicBool,
}

impl HttpSession {
    /// Creates a session with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Network`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, SessionError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// Creates a session with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Network`] if the HTTP client cannot be built.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(read)
            .gzip(true)
            .user_agent(default_user_agent())
            .build()
            .map_err(|e| SessionError::network("building HTTP client", e))?;
        Ok(Self::with_client(client))
    }

    /// Creates a session around an existing client (sessions may share one).
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            page: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    async fn settled_position(&self) -> Result<ScrollPosition, SessionError> {
        self.ensure_open()?;
        if self.page.lock().await.is_none() {
            return Err(SessionError::NoPage);
        }
        Ok(ScrollPosition::default())
    }
}

#[async_trait]
impl RenderSession for HttpSession {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, locator: &str) -> Result<PageResponse, SessionError> {
        self.ensure_open()?;
        let url = Url::parse(locator).map_err(|e| SessionError::InvalidLocator {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error("loading page", &e))?;
        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            *self.page.lock().await = None;
            debug!(status = status.as_u16(), "page load returned error status");
            return Ok(PageResponse {
                status: status.as_u16(),
                title: None,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| map_request_error("reading page", &e))?;
        let page = render_document(&final_url, &body);
        debug!(
            elements = page.elements.len(),
            title = page.title.as_deref().unwrap_or(""),
            "page rendered"
        );
        let title = page.title.clone();
        *self.page.lock().await = Some(page);

        Ok(PageResponse {
            status: status.as_u16(),
            title,
        })
    }

    async fn content_elements(&self) -> Result<Vec<ContentElement>, SessionError> {
        self.ensure_open()?;
        let page = self.page.lock().await;
        let page = page.as_ref().ok_or(SessionError::NoPage)?;
        Ok(page.elements.iter().map(|rendered| rendered.element).collect())
    }

    async fn scroll_by(&self, _distance: u32) -> Result<ScrollPosition, SessionError> {
        self.settled_position().await
    }

    async fn scroll_to_bottom(&self) -> Result<ScrollPosition, SessionError> {
        self.settled_position().await
    }

    #[instrument(level = "debug", skip(self))]
    async fn extract_item(&self, index: u32) -> Result<ItemPayload, SessionError> {
        self.ensure_open()?;
        let source = {
            let page = self.page.lock().await;
            let page = page.as_ref().ok_or(SessionError::NoPage)?;
            page.elements
                .iter()
                .find(|rendered| rendered.element.content_index() == Some(index))
                .and_then(|rendered| rendered.source.clone())
                .ok_or(SessionError::ElementNotFound { index })?
        };

        trace!(source = %source, "fetching item payload");
        let response = self
            .client
            .get(source.clone())
            .send()
            .await
            .map_err(|e| map_request_error("fetching item", &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::network(
                "fetching item",
                format!("HTTP {} from {source}", status.as_u16()),
            ));
        }

        let extension = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(extension_from_content_type)
            .map(str::to_string)
            .or_else(|| extension_from_url(&source));

        let mut stream = response.bytes_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_request_error("reading item", &e))?;
            bytes.extend_from_slice(&chunk);
        }

        Ok(ItemPayload { bytes, extension })
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        *self.page.lock().await = None;
        Ok(())
    }
}

fn map_request_error(operation: &str, error: &reqwest::Error) -> SessionError {
    if error.is_timeout() {
        SessionError::timeout(operation)
    } else {
        SessionError::network(operation, error)
    }
}

fn render_document(base: &Url, html: &str) -> RenderedPage {
    let document = Html::parse_document(html);
    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|title| {
            title
                .text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|title| !title.is_empty());

    let elements = document
        .select(&ELEMENT_SELECTOR)
        .map(|img| parse_element(base, img))
        .collect();

    RenderedPage { title, elements }
}

fn parse_element(base: &Url, img: ElementRef<'_>) -> RenderedElement {
    let img = img.value();
    let marker = match img
        .attr("data-index")
        .and_then(|raw| raw.trim().parse::<u32>().ok())
    {
        Some(index) if index > 0 => IndexMarker::Index(index),
        _ => IndexMarker::Error,
    };
    let error_visible = img.classes().any(|class| class == ERROR_CLASS);
    let source = img
        .attr("data-src")
        .or_else(|| img.attr("src"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| base.join(value).ok());

    RenderedElement {
        element: ContentElement {
            marker,
            error_visible,
        },
        source,
    }
}

fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

fn extension_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, extension) = segment.rsplit_once('.')?;
    let valid = !extension.is_empty()
        && extension.len() <= 5
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| extension.to_ascii_lowercase())
}
