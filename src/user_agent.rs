//! Shared User-Agent string for page and item requests.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/chapter-fetcher";

/// Default User-Agent for rendering sessions (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("chapter-fetcher/{version} (+{PROJECT_UA_URL})")
}
