//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Resumable, incremental downloader for lazily rendered chapters.
///
/// Each collection is walked chapter by chapter. Pages are loaded until their
/// item count settles, compared with what is already on disk, and only the
/// missing items are fetched. Re-running over a finished collection downloads
/// nothing.
#[derive(Parser, Debug)]
#[command(name = "chapter-fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Collections to process, as ID or ID=NAME (NAME is the directory on disk)
    #[arg(value_name = "ID[=NAME]", required = true)]
    pub collections: Vec<String>,

    /// Chapter locator, e.g. "https://host/read/{collection}/{chapter}"
    #[arg(short = 't', long)]
    pub locator_template: Option<String>,

    /// Root directory collections are stored under [default: .]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// First chapter to process
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub start: u32,

    /// Last chapter to process (default: walk until the collection ends)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub end: Option<u32>,

    /// Rendering sessions, i.e. collections processed at once (1-32)
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u32).range(1..=32))]
    pub pool_size: Option<u32>,

    /// Attempts per chapter for transient failures (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Item files smaller than this many bytes are re-fetched
    #[arg(long)]
    pub min_valid_size: Option<u64>,

    /// Unchanged load rounds required before a chapter's count is trusted
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub stable_threshold: Option<u32>,

    /// Maximum load rounds per chapter
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub max_rounds: Option<u32>,

    /// Consecutive failed chapters that end an open-ended collection
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub failure_limit: Option<u32>,

    /// Seconds a collection waits for a free session before the run gives up on it
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub acquire_timeout: Option<u64>,

    /// Config file path (default: $XDG_CONFIG_HOME/chapter-fetcher/config.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
