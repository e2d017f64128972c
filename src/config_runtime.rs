//! Merges CLI flags, the config file and engine defaults into runtime settings.
//!
//! Precedence is CLI flag > config file > built-in default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chapter_fetcher::session::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use chapter_fetcher::{Collection, EngineConfig, LocatorTemplate, RunSummary};

use crate::ProcessExit;
use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HttpTimeoutSettings {
    pub(crate) connect: Duration,
    pub(crate) read: Duration,
}

impl Default for HttpTimeoutSettings {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

pub(crate) fn resolve_engine_config(
    args: &Args,
    file_config: Option<&FileConfig>,
) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();

    if let Some(file_config) = file_config {
        if let Some(pool_size) = file_config.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(max_attempts) = file_config.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(min_valid_size) = file_config.min_valid_size {
            config.min_valid_size = min_valid_size;
        }
        if let Some(stable_threshold) = file_config.stable_threshold {
            config.stable_threshold = stable_threshold;
        }
        if let Some(max_rounds) = file_config.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(limit) = file_config.consecutive_failure_limit {
            config.consecutive_failure_limit = limit;
        }
        if let Some(secs) = file_config.acquire_timeout_secs {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(min_items) = file_config.lenient_min_items {
            config.lenient_min_items = min_items;
        }
        if let Some(max_gaps) = file_config.lenient_max_gaps {
            config.lenient_max_gaps = max_gaps;
        }
        if let Some(suffix) = &file_config.item_suffix {
            config.item_suffix.clone_from(suffix);
        }
    }

    if let Some(pool_size) = args.pool_size {
        config.pool_size = usize::try_from(pool_size).context("pool size out of range")?;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(min_valid_size) = args.min_valid_size {
        config.min_valid_size = min_valid_size;
    }
    if let Some(stable_threshold) = args.stable_threshold {
        config.stable_threshold = stable_threshold;
    }
    if let Some(max_rounds) = args.max_rounds {
        config.max_rounds = max_rounds;
    }
    if let Some(limit) = args.failure_limit {
        config.consecutive_failure_limit = limit;
    }
    if let Some(secs) = args.acquire_timeout {
        config.acquire_timeout = Duration::from_secs(secs);
    }

    config
        .validate()
        .context("Invalid effective engine configuration")?;
    Ok(config)
}

pub(crate) fn resolve_locator_template(
    args: &Args,
    file_config: Option<&FileConfig>,
) -> Result<LocatorTemplate> {
    let raw = args
        .locator_template
        .clone()
        .or_else(|| file_config.and_then(|c| c.locator_template.clone()));
    let Some(raw) = raw else {
        bail!(
            "No locator template configured.\n  \
             Pass --locator-template or set `locator_template` in the config file"
        );
    };
    LocatorTemplate::parse(raw).context("Invalid locator template")
}

pub(crate) fn resolve_output_dir(args: &Args, file_config: Option<&FileConfig>) -> PathBuf {
    args.output_dir
        .clone()
        .or_else(|| file_config.and_then(|c| c.output_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Parses `ID` / `ID=NAME` arguments into collections covering `start..=end`.
pub(crate) fn parse_collections(
    raw: &[String],
    start: u32,
    end: Option<u32>,
) -> Result<Vec<Collection>> {
    if let Some(end) = end
        && end < start
    {
        bail!("Invalid chapter range: --end {end} is before --start {start}");
    }

    let mut collections = Vec::with_capacity(raw.len());
    for entry in raw {
        let (id, name) = match entry.split_once('=') {
            Some((id, name)) => (id.trim(), Some(name.trim())),
            None => (entry.trim(), None),
        };
        if id.is_empty() {
            bail!("Invalid collection '{entry}': the ID must not be empty");
        }
        let mut collection = Collection::new(id).with_range(start, end);
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            collection = collection.with_name(name);
        }
        if collections.iter().any(|c: &Collection| c.id == collection.id) {
            bail!("Collection '{id}' was given more than once");
        }
        collections.push(collection);
    }
    Ok(collections)
}

pub(crate) fn resolve_http_timeouts(file_config: Option<&FileConfig>) -> HttpTimeoutSettings {
    let mut settings = HttpTimeoutSettings::default();
    let Some(file_config) = file_config else {
        return settings;
    };
    if let Some(secs) = file_config.connect_timeout_secs {
        settings.connect = Duration::from_secs(secs);
    }
    if let Some(secs) = file_config.read_timeout_secs {
        settings.read = Duration::from_secs(secs);
    }
    settings
}

pub(crate) fn resolve_default_log_level(
    args: &Args,
    file_config: Option<&FileConfig>,
) -> &'static str {
    if should_force_cli_log_level(args) {
        return cli_log_level(args.verbose, args.quiet);
    }
    match file_config.and_then(|c| c.verbosity) {
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Verbose) => "debug",
        Some(VerbositySetting::Debug) => "trace",
        Some(VerbositySetting::Default) | None => "info",
    }
}

pub(crate) fn should_force_cli_log_level(args: &Args) -> bool {
    args.verbose > 0 || args.quiet
}

fn cli_log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Maps a run summary to the process exit outcome.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    if !summary.has_failures() {
        ProcessExit::Success
    } else if summary.has_successes() {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
