//! Remote locator templates.
//!
//! A template is a URL (or any session-understood path) with two placeholders:
//! `{collection}` for the collection id and `{chapter}` for the chapter index.
//!
//! ```
//! use chapter_fetcher::locator::LocatorTemplate;
//!
//! let template = LocatorTemplate::parse("https://example.com/m/{collection}/{chapter}").unwrap();
//! assert_eq!(template.render("42", 7), "https://example.com/m/42/7");
//! ```

use thiserror::Error;
use url::Url;

/// Placeholder replaced by the collection id.
pub const COLLECTION_PLACEHOLDER: &str = "{collection}";

/// Placeholder replaced by the chapter index.
pub const CHAPTER_PLACEHOLDER: &str = "{chapter}";

/// Rejected locator template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// The chapter placeholder is required, otherwise every chapter maps to one resource.
    #[error("locator template `{template}` has no {CHAPTER_PLACEHOLDER} placeholder")]
    MissingChapterPlaceholder {
        /// The template as given.
        template: String,
    },

    /// An `http(s)` template that does not parse as a URL once filled in.
    #[error("locator template `{template}` does not form a valid URL: {reason}")]
    InvalidUrl {
        /// The template as given.
        template: String,
        /// Parser message.
        reason: String,
    },
}

/// Validated locator template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorTemplate {
    template: String,
}

impl LocatorTemplate {
    /// Validates a template string.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError`] when the chapter placeholder is missing or an
    /// HTTP template cannot form a URL.
    pub fn parse(template: impl Into<String>) -> Result<Self, LocatorError> {
        let template = template.into();
        if !template.contains(CHAPTER_PLACEHOLDER) {
            return Err(LocatorError::MissingChapterPlaceholder { template });
        }

        let candidate = Self {
            template: template.clone(),
        };
        let sample = candidate.render("0", 1);
        if sample.starts_with("http://") || sample.starts_with("https://") {
            Url::parse(&sample).map_err(|e| LocatorError::InvalidUrl {
                template,
                reason: e.to_string(),
            })?;
        }
        Ok(candidate)
    }

    /// Fills in the placeholders.
    #[must_use]
    pub fn render(&self, collection_id: &str, chapter: u32) -> String {
        self.template
            .replace(COLLECTION_PLACEHOLDER, collection_id)
            .replace(CHAPTER_PLACEHOLDER, &chapter.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }
}
