//! Incremental item fetcher.
//!
//! Extracts and persists exactly the items a completeness report lists as
//! missing. One bad item never aborts the batch: its failure is recorded in the
//! [`FetchSummary`] and the loop moves on.
//!
//! Payloads are written to `<name>.part` and renamed into place, so an
//! interrupted write never leaves a truncated file under a valid item name.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::layout::{PARTIAL_SUFFIX, item_file_name};
use crate::local::{ItemFile, list_item_files};
use crate::session::{RenderSession, SessionError};

/// Parameters of the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParams {
    /// Payloads and files below this size are not valid items.
    pub min_valid_size: u64,
    /// Target counts above this are fetched in batches.
    pub batch_threshold: usize,
    /// Items per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Middle part of item file names.
    pub item_suffix: String,
    /// Extension used when the payload names none.
    pub default_extension: String,
}

/// Failure of a single item.
#[derive(Debug, Error)]
pub enum FetchItemError {
    #[error("extracting item {index}: {source}")]
    Extract {
        index: u32,
        #[source]
        source: SessionError,
    },

    #[error("item {index} payload is {size} bytes, below the {min} byte minimum")]
    TooSmall { index: u32, size: u64, min: u64 },

    #[error("writing item {index} to {path}: {source}")]
    Io {
        index: u32,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One item that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub index: u32,
    pub reason: String,
}

/// Per-chapter fetch tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    /// Items written by this pass.
    pub downloaded: usize,
    /// Targets already present as valid files.
    pub skipped: usize,
    /// Targets that could not be fetched.
    pub failed: Vec<FailedItem>,
}

impl FetchSummary {
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Whether every target was downloaded or already present.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches missing items through a session.
#[derive(Debug, Clone)]
pub struct IncrementalFetcher {
    params: FetchParams,
}

impl IncrementalFetcher {
    #[must_use]
    pub fn new(params: FetchParams) -> Self {
        Self { params }
    }

    /// Downloads every index in `missing` that has no valid file in `dir`.
    ///
    /// # Errors
    ///
    /// Only fails when `dir` cannot be created or listed; per-item failures are
    /// reported through [`FetchSummary::failed`].
    #[instrument(level = "debug", skip(self, session, missing), fields(dir = %dir.display(), targets = missing.len()))]
    pub async fn fetch_missing(
        &self,
        session: &dyn RenderSession,
        dir: &Path,
        missing: &BTreeSet<u32>,
    ) -> io::Result<FetchSummary> {
        let mut summary = FetchSummary::default();
        if missing.is_empty() {
            return Ok(summary);
        }

        tokio::fs::create_dir_all(dir).await?;
        let existing = list_item_files(dir).await?;
        let valid: BTreeSet<u32> = existing
            .iter()
            .filter(|file| file.is_valid(self.params.min_valid_size))
            .map(|file| file.index)
            .collect();

        let targets: Vec<u32> = missing.iter().copied().collect();
        let batches: Vec<&[u32]> = if targets.len() > self.params.batch_threshold {
            targets.chunks(self.params.batch_size.max(1)).collect()
        } else {
            vec![targets.as_slice()]
        };
        if batches.len() > 1 {
            info!(
                targets = targets.len(),
                batches = batches.len(),
                "fetching missing items in batches"
            );
        }

        for (batch_number, batch) in batches.iter().enumerate() {
            if batch_number > 0 {
                tokio::time::sleep(self.params.batch_pause).await;
            }
            for &index in *batch {
                if valid.contains(&index) {
                    summary.skipped += 1;
                    continue;
                }
                match self.fetch_one(session, dir, index, &existing).await {
                    Ok(path) => {
                        debug!(index, path = %path.display(), "item saved");
                        summary.downloaded += 1;
                    }
                    Err(error) => {
                        warn!(index, error = %error, "item fetch failed, continuing");
                        summary.failed.push(FailedItem {
                            index,
                            reason: error.to_string(),
                        });
                    }
                }
            }
        }

        debug!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "fetch pass finished"
        );
        Ok(summary)
    }

    async fn fetch_one(
        &self,
        session: &dyn RenderSession,
        dir: &Path,
        index: u32,
        existing: &[ItemFile],
    ) -> Result<PathBuf, FetchItemError> {
        let payload = session
            .extract_item(index)
            .await
            .map_err(|source| FetchItemError::Extract { index, source })?;

        let size = u64::try_from(payload.bytes.len()).unwrap_or(u64::MAX);
        if size < self.params.min_valid_size {
            return Err(FetchItemError::TooSmall {
                index,
                size,
                min: self.params.min_valid_size,
            });
        }

        let extension = payload
            .extension
            .as_deref()
            .map(sanitize_extension)
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| self.params.default_extension.clone());
        let name = item_file_name(index, &self.params.item_suffix, &extension);
        let path = dir.join(&name);
        let partial = dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        let written = match tokio::fs::write(&partial, &payload.bytes).await {
            Ok(()) => tokio::fs::rename(&partial, &path).await,
            Err(error) => Err(error),
        };
        if let Err(source) = written {
            if let Err(error) = tokio::fs::remove_file(&partial).await
                && error.kind() != io::ErrorKind::NotFound
            {
                debug!(path = %partial.display(), error = %error, "could not remove partial item file");
            }
            return Err(FetchItemError::Io {
                index,
                path,
                source,
            });
        }

        // Undersized files left under another name for this index.
        for stale in existing
            .iter()
            .filter(|file| file.index == index && file.path != path)
        {
            if let Err(error) = tokio::fs::remove_file(&stale.path).await {
                debug!(path = %stale.path.display(), error = %error, "could not remove stale item file");
            }
        }
        Ok(path)
    }
}

fn sanitize_extension(raw: &str) -> String {
    raw.trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase()
}
