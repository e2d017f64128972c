//! Run summary rendering.

use std::path::Path;

use anyhow::{Context, Result};
use chapter_fetcher::{ChapterOutcome, CollectionSummary, RunSummary, StopReason};
use tracing::info;

pub(crate) fn print_run_summary(summary: &RunSummary, output_dir: &Path, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
        println!("{rendered}");
        return Ok(());
    }

    let stats = &summary.stats;
    info!(
        complete = stats.chapters_complete,
        partial = stats.chapters_partial,
        failed = stats.chapters_failed,
        not_found = stats.chapters_not_found,
        items_downloaded = stats.items_downloaded,
        output_dir = %output_dir.display(),
        "Run Summary"
    );
    for line in render_summary_lines(summary) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn render_summary_lines(summary: &RunSummary) -> Vec<String> {
    let mut lines = Vec::new();
    for collection in &summary.collections {
        lines.push(collection_line(collection));
        for chapter in &collection.chapters {
            match &chapter.outcome {
                ChapterOutcome::Partial { report, .. } => {
                    let missing: Vec<String> = report
                        .missing_indices
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    lines.push(format!(
                        "  chapter {}: partial, {} of {} items, missing [{}]",
                        chapter.index,
                        report.local_count,
                        report.remote_count,
                        missing.join(", ")
                    ));
                }
                ChapterOutcome::Failed { class, error, .. } => {
                    lines.push(format!(
                        "  chapter {}: failed after {} attempt(s) ({class:?}): {error}",
                        chapter.index, chapter.attempts
                    ));
                }
                ChapterOutcome::Complete { .. } | ChapterOutcome::NotFound => {}
            }
            if let Some(err) = &chapter.compile_error {
                lines.push(format!("  chapter {}: compile failed: {err}", chapter.index));
            }
        }
    }
    if !summary.pool_exhausted.is_empty() {
        lines.push(format!(
            "Not started (no session became available): {}",
            summary.pool_exhausted.join(", ")
        ));
        lines.push("  Re-run to resume; chapters already on disk are skipped.".to_string());
    }
    lines
}

fn collection_line(collection: &CollectionSummary) -> String {
    let stop = match collection.stop_reason {
        StopReason::RangeExhausted => "range done".to_string(),
        StopReason::EndOfCollection {
            consecutive_failures,
        } => format!("end reached after {consecutive_failures} missing chapter(s)"),
        StopReason::ChapterCap { max_chapters } => format!("stopped at cap of {max_chapters}"),
    };
    format!(
        "{}: {} complete, {} partial, {} failed, {} items fetched ({stop})",
        collection.name,
        collection.complete_count(),
        collection.partial_count(),
        collection.failed_count(),
        collection.downloaded_items(),
    )
}
