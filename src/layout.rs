//! On-disk layout convention.
//!
//! ```text
//! <output>/<collection>/<chapter-dir>/<index>-<suffix>.<ext>
//! ```
//!
//! Only file names starting with `<digits>-` are item files; everything else in
//! a chapter directory is ignored by the engine.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Item file names: a positive index followed by `-`.
#[allow(clippy::expect_used)]
static ITEM_INDEX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)-").expect("item index regex is valid") // Static pattern, safe to panic
});

/// Suffix of in-flight item writes; never matched as an item.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Directory holding one collection.
#[must_use]
pub fn collection_dir(root: &Path, collection_name: &str) -> PathBuf {
    root.join(sanitize_component(collection_name))
}

/// Directory name of a chapter, carrying its ordinal.
#[must_use]
pub fn chapter_dir_name(index: u32) -> String {
    format!("chapter-{index:04}")
}

/// Directory holding one chapter of a collection.
#[must_use]
pub fn chapter_dir(root: &Path, collection_name: &str, index: u32) -> PathBuf {
    collection_dir(root, collection_name).join(chapter_dir_name(index))
}

/// File name for an item.
#[must_use]
pub fn item_file_name(index: u32, suffix: &str, extension: &str) -> String {
    format!("{index}-{suffix}.{extension}")
}

/// Parses the item index from a file name, if it follows the convention.
///
/// Index `0` and in-flight `.part` files are rejected.
#[must_use]
pub fn parse_item_index(file_name: &str) -> Option<u32> {
    if file_name.ends_with(PARTIAL_SUFFIX) {
        return None;
    }
    let captures = ITEM_INDEX_PATTERN.captures(file_name)?;
    let index = captures.get(1)?.as_str().parse::<u32>().ok()?;
    (index > 0).then_some(index)
}

/// Makes a collection name safe as a single path component.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
