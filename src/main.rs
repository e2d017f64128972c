//! CLI entry point for chapter-fetcher.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use chapter_fetcher::{HttpSession, Orchestrator, SessionPool, SharedSession};
use clap::Parser;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod config_runtime;
mod output;
mod progress;

use cli::Args;

/// Process exit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every chapter is complete (or nothing needed fetching).
    Success,
    /// Some chapters are complete, others still need a re-run.
    Partial,
    /// Nothing completed.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = app_config::load_file_config_from(args.config.as_deref())?;
    let file_config = loaded.config.as_ref();

    init_tracing(
        config_runtime::resolve_default_log_level(&args, file_config),
        config_runtime::should_force_cli_log_level(&args),
    );
    debug!(?args, "CLI arguments parsed");
    if loaded.loaded_from_file
        && let Some(path) = &loaded.path
    {
        info!(path = %path.display(), "Loaded config file");
    }

    let config = config_runtime::resolve_engine_config(&args, file_config)?;
    let locator = config_runtime::resolve_locator_template(&args, file_config)?;
    let output_dir = config_runtime::resolve_output_dir(&args, file_config);
    let collections = config_runtime::parse_collections(&args.collections, args.start, args.end)?;
    let timeouts = config_runtime::resolve_http_timeouts(file_config);

    info!(
        collections = collections.len(),
        pool_size = config.pool_size,
        locator = locator.as_str(),
        output_dir = %output_dir.display(),
        "chapter-fetcher starting"
    );

    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

    let mut sessions: Vec<SharedSession> = Vec::with_capacity(config.pool_size);
    for _ in 0..config.pool_size {
        let session = HttpSession::with_timeouts(timeouts.connect, timeouts.read)
            .context("Failed to create HTTP session")?;
        sessions.push(Arc::new(session));
    }
    let pool = Arc::new(SessionPool::new(sessions, config.acquire_poll_interval)?);

    let orchestrator = Orchestrator::new(Arc::clone(&pool), config, locator, output_dir.clone())?;

    let (progress_handle, progress_stop) = progress::spawn_progress_ui(
        progress::should_use_spinner(args.quiet, args.json),
        orchestrator.stats(),
        Arc::clone(&pool),
    );

    let summary = tokio::select! {
        summary = orchestrator.run(collections) => Some(summary),
        _ = tokio::signal::ctrl_c() => None,
    };

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }
    pool.close().await;

    let Some(summary) = summary else {
        let stats = orchestrator.stats().snapshot();
        warn!(
            complete = stats.chapters_complete,
            items_downloaded = stats.items_downloaded,
            "Interrupted. Run again to resume."
        );
        return Ok(ProcessExit::Failure);
    };

    output::print_run_summary(&summary, &output_dir, args.json)?;
    Ok(config_runtime::determine_exit_outcome(&summary))
}

fn init_tracing(default_level: &str, force_cli_level: bool) {
    // RUST_LOG wins unless -v/-q was given explicitly
    let filter = if force_cli_level {
        tracing_subscriber::EnvFilter::new(default_level)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}
