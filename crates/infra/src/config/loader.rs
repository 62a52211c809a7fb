//! Configuration loader
//!
//! ## Loading Strategy
//! 1. An explicit path must exist; otherwise standard locations are probed
//! 2. Without any file, [`CredCacheConfig::default`] is used
//! 3. `CREDCACHE_*` environment variables override individual fields
//!
//! ## Environment Variables
//! - `CREDCACHE_CLOUD`: `AzureCloud`, `AzureChinaCloud` or `AzureUSGovernment`
//! - `CREDCACHE_BROKER_ENABLED`: allow a native broker (bool)
//! - `CREDCACHE_BROKER_DEDUPE_IAT`: drop broker events with an unchanged `iat`
//! - `CREDCACHE_REFRESH_MARGIN_SECONDS`: refresh this long before expiry
//! - `CREDCACHE_INTERACTIVE_TIMEOUT_SECONDS`: bound on one interactive attempt
//! - `CREDCACHE_FALLBACK_ON_CANCEL`: answer to the fallback prompt (bool)
//! - `CREDCACHE_KEYRING_SERVICE`: keyring service name
//! - `CREDCACHE_STATE_PATH`: memento file
//! - `CREDCACHE_LOG_LEVEL`: `tracing` filter directive
//! - `CREDCACHE_LOG_JSON`: JSON log output (bool)
//!
//! ## File Locations
//! Probed in order: `./credcache.toml`, `./credcache.json`, `./config.toml`,
//! `./config.json`, then the same names next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use credcache_domain::{CloudEnvironment, CredCacheConfig, CredCacheError, Result};

const FILE_NAMES: [&str; 4] = ["credcache.toml", "credcache.json", "config.toml", "config.json"];

/// Load configuration from a file (explicit or probed) plus environment
/// overrides.
///
/// # Errors
/// Returns `CredCacheError::Config` if an explicit file is missing, a file
/// cannot be parsed, or an environment override has an invalid value.
pub fn load(path: Option<PathBuf>) -> Result<CredCacheConfig> {
    let config = match path {
        Some(path) => load_from_file(Some(path))?,
        None => match probe_config_paths() {
            Some(found) => load_from_file(Some(found))?,
            None => {
                tracing::debug!("no config file found; using defaults");
                CredCacheConfig::default()
            }
        },
    };
    apply_env_overrides(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations and fails when none
/// exists. Format is detected by file extension.
///
/// # Errors
/// Returns `CredCacheError::Config` if the file is missing or invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<CredCacheConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CredCacheError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CredCacheError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CredCacheError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<CredCacheConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CredCacheError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CredCacheError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CredCacheError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file in the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(FILE_NAMES.iter().map(|name| cwd.join(name)));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(FILE_NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Apply `CREDCACHE_*` overrides from the process environment.
///
/// # Errors
/// Returns `CredCacheError::Config` for unparseable values.
pub fn apply_env_overrides(config: CredCacheConfig) -> Result<CredCacheConfig> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

fn apply_overrides<F>(mut config: CredCacheConfig, lookup: F) -> Result<CredCacheConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(cloud) = lookup("CREDCACHE_CLOUD") {
        config.cloud = CloudEnvironment::from_name(cloud.trim())
            .ok_or_else(|| CredCacheError::Config(format!("Unknown cloud: {cloud}")))?;
    }
    if let Some(value) = lookup("CREDCACHE_BROKER_ENABLED") {
        config.broker.enabled = parse_bool(&value);
    }
    if let Some(value) = lookup("CREDCACHE_BROKER_DEDUPE_IAT") {
        config.broker.dedupe_unchanged_iat = parse_bool(&value);
    }
    if let Some(value) = lookup("CREDCACHE_REFRESH_MARGIN_SECONDS") {
        config.refresh.margin_seconds = parse_number("CREDCACHE_REFRESH_MARGIN_SECONDS", &value)?;
    }
    if let Some(value) = lookup("CREDCACHE_INTERACTIVE_TIMEOUT_SECONDS") {
        config.interactive.timeout_seconds =
            parse_number("CREDCACHE_INTERACTIVE_TIMEOUT_SECONDS", &value)?;
    }
    if let Some(value) = lookup("CREDCACHE_FALLBACK_ON_CANCEL") {
        config.interactive.fallback_on_cancel = parse_bool(&value);
    }
    if let Some(value) = lookup("CREDCACHE_KEYRING_SERVICE") {
        config.storage.keyring_service = value;
    }
    if let Some(value) = lookup("CREDCACHE_STATE_PATH") {
        config.storage.state_path = value;
    }
    if let Some(value) = lookup("CREDCACHE_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Some(value) = lookup("CREDCACHE_LOG_JSON") {
        config.logging.json = parse_bool(&value);
    }
    Ok(config)
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| CredCacheError::Config(format!("Invalid value for {key}: {e}")))
}
