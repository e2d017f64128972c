//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// TOML-backed file configuration for chapter-fetcher defaults.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Root directory collections are stored under.
    pub output_dir: Option<PathBuf>,
    /// Chapter locator with `{collection}` and `{chapter}` placeholders.
    pub locator_template: Option<String>,
    /// Number of rendering sessions.
    pub pool_size: Option<usize>,
    /// Attempts per chapter, including the first.
    pub max_attempts: Option<u32>,
    /// Item files below this many bytes are treated as missing.
    pub min_valid_size: Option<u64>,
    /// Unchanged load rounds before a count is trusted.
    pub stable_threshold: Option<u32>,
    /// Cap on exhaustive-load rounds.
    pub max_rounds: Option<u32>,
    /// Consecutive failed chapters that end a collection.
    pub consecutive_failure_limit: Option<u32>,
    /// How long a collection waits for a free session, in seconds.
    pub acquire_timeout_secs: Option<u64>,
    /// Lenient fallback: minimum local items.
    pub lenient_min_items: Option<usize>,
    /// Lenient fallback: maximum tolerated gaps.
    pub lenient_max_gaps: Option<usize>,
    /// Middle part of item file names.
    pub item_suffix: Option<String>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
    /// HTTP session connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP session read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(pool_size) = self.pool_size
            && !(1..=32).contains(&pool_size)
        {
            bail!("Invalid config value for `pool_size`: {pool_size}. Expected range: 1..=32");
        }
        if let Some(max_attempts) = self.max_attempts
            && !(1..=10).contains(&max_attempts)
        {
            bail!("Invalid config value for `max_attempts`: {max_attempts}. Expected range: 1..=10");
        }
        validate_at_least_one("stable_threshold", self.stable_threshold)?;
        validate_at_least_one("max_rounds", self.max_rounds)?;
        validate_at_least_one("consecutive_failure_limit", self.consecutive_failure_limit)?;
        if let (Some(stable), Some(rounds)) = (self.stable_threshold, self.max_rounds)
            && stable > rounds
        {
            bail!(
                "Invalid config value for `stable_threshold`: {stable}. Must not exceed `max_rounds` ({rounds})"
            );
        }
        validate_timeout_secs("acquire_timeout_secs", self.acquire_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(template) = &self.locator_template
            && template.trim().is_empty()
        {
            bail!("Invalid config value for `locator_template`: must not be empty");
        }
        if let Some(suffix) = &self.item_suffix
            && suffix.is_empty()
        {
            bail!("Invalid config value for `item_suffix`: must not be empty");
        }
        Ok(())
    }
}

fn validate_at_least_one(field: &str, value: Option<u32>) -> Result<()> {
    if value == Some(0) {
        bail!("Invalid config value for `{field}`: 0. Expected a value >= 1");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/chapter-fetcher/config.toml`
/// 2. `$HOME/.config/chapter-fetcher/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("chapter-fetcher")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("chapter-fetcher")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` when given, otherwise from the default path if present.
///
/// An explicit path that does not exist is an error; a missing default file is not.
pub fn load_file_config_from(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
            loaded_from_file: true,
        });
    }
    load_default_file_config()
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_number = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "output_dir" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.output_dir = Some(PathBuf::from(parsed));
            }
            "locator_template" => {
                cfg.locator_template = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "item_suffix" => {
                cfg.item_suffix = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "pool_size" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.pool_size = Some(usize::try_from(parsed).with_context(invalid)?);
            }
            "max_attempts" => {
                cfg.max_attempts = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "min_valid_size" => {
                cfg.min_valid_size = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "stable_threshold" => {
                cfg.stable_threshold = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "max_rounds" => {
                cfg.max_rounds = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "consecutive_failure_limit" => {
                cfg.consecutive_failure_limit =
                    Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "acquire_timeout_secs" => {
                cfg.acquire_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "lenient_min_items" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.lenient_min_items = Some(usize::try_from(parsed).with_context(invalid)?);
            }
            "lenient_max_gaps" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.lenient_max_gaps = Some(usize::try_from(parsed).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_number}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let value = parse_integer_u64(raw_value)?;
    u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
