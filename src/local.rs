//! Local state derived from a chapter directory.
//!
//! Nothing about download progress is persisted separately: the set of valid
//! item files on disk *is* the state, which is what makes every run resumable.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::layout::parse_item_index;

/// One item file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFile {
    /// Positive item index parsed from the file name.
    pub index: u32,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Full path.
    pub path: PathBuf,
}

impl ItemFile {
    /// An item is valid only when it reaches the minimum size; smaller files are
    /// placeholders or truncated writes.
    #[must_use]
    pub fn is_valid(&self, min_valid_size: u64) -> bool {
        self.size_bytes >= min_valid_size
    }
}

/// Valid item indices present in a chapter directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalState {
    /// Indices with at least one valid file.
    pub existing_indices: BTreeSet<u32>,
    /// Highest valid index, `0` when empty.
    pub max_index: u32,
}

impl LocalState {
    /// Builds a state from a set of valid indices.
    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        let existing_indices: BTreeSet<u32> = indices.into_iter().filter(|i| *i > 0).collect();
        let max_index = existing_indices.last().copied().unwrap_or(0);
        Self {
            existing_indices,
            max_index,
        }
    }

    /// Number of valid items.
    #[must_use]
    pub fn count(&self) -> usize {
        self.existing_indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.existing_indices.is_empty()
    }

    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.existing_indices.contains(&index)
    }

    /// Indices in `1..=max_index` with no valid file.
    #[must_use]
    pub fn gaps(&self) -> BTreeSet<u32> {
        (1..=self.max_index)
            .filter(|i| !self.existing_indices.contains(i))
            .collect()
    }
}

/// Lists every file in `dir` whose name follows the item convention.
///
/// A missing directory yields an empty list.
///
/// # Errors
///
/// Returns the underlying I/O error if the directory exists but cannot be read.
pub async fn list_item_files(dir: &Path) -> io::Result<Vec<ItemFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(index) = parse_item_index(name) else {
            trace!(file = name, "ignoring non-item file");
            continue;
        };
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        files.push(ItemFile {
            index,
            size_bytes: metadata.len(),
            path: entry.path(),
        });
    }
    files.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Scans a chapter directory into a [`LocalState`], dropping undersized files.
///
/// # Errors
///
/// Returns the underlying I/O error if the directory cannot be read.
#[instrument(level = "debug", fields(dir = %dir.display()))]
pub async fn scan_local_state(dir: &Path, min_valid_size: u64) -> io::Result<LocalState> {
    let files = list_item_files(dir).await?;
    let total = files.len();
    let state = LocalState::from_indices(
        files
            .into_iter()
            .filter(|file| file.is_valid(min_valid_size))
            .map(|file| file.index),
    );
    debug!(
        files = total,
        valid = state.count(),
        max_index = state.max_index,
        "scanned local state"
    );
    Ok(state)
}
