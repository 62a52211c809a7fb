//! Configuration structures
//!
//! Loaded by `credcache-infra` from a TOML/JSON file plus `CREDCACHE_*`
//! environment overrides. Every section has defaults so an empty file is a
//! valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_INTERACTIVE_TIMEOUT, DEFAULT_REFRESH_MARGIN};

/// Sovereign cloud the provider signs in against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudEnvironment {
    #[default]
    AzureCloud,
    AzureChinaCloud,
    AzureUSGovernment,
}

impl CloudEnvironment {
    /// Cloud name used to namespace persisted secrets.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AzureCloud => "AzureCloud",
            Self::AzureChinaCloud => "AzureChinaCloud",
            Self::AzureUSGovernment => "AzureUSGovernment",
        }
    }

    /// Base URL of the Active Directory endpoint (trailing slash included).
    #[must_use]
    pub fn active_directory_endpoint_url(self) -> &'static str {
        match self {
            Self::AzureCloud => "https://login.microsoftonline.com/",
            Self::AzureChinaCloud => "https://login.chinacloudapi.cn/",
            Self::AzureUSGovernment => "https://login.microsoftonline.us/",
        }
    }

    /// Parse a cloud name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::AzureCloud, Self::AzureChinaCloud, Self::AzureUSGovernment]
            .into_iter()
            .find(|cloud| cloud.name().eq_ignore_ascii_case(name))
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredCacheConfig {
    pub cloud: CloudEnvironment,
    pub broker: BrokerConfig,
    pub refresh: RefreshConfig,
    pub interactive: InteractiveConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Native broker behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Whether a native broker may be used when the client reports one.
    pub enabled: bool,
    /// Drop broker-sourced change events whose `iat` claim did not move.
    pub dedupe_unchanged_iat: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: false, dedupe_unchanged_iat: true }
    }
}

/// Background refresh scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Refresh this many seconds before a token expires.
    pub margin_seconds: u64,
}

impl RefreshConfig {
    #[must_use]
    pub fn margin(&self) -> Duration {
        Duration::from_secs(self.margin_seconds)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { margin_seconds: DEFAULT_REFRESH_MARGIN.as_secs() }
    }
}

/// Interactive sign-in behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveConfig {
    pub timeout_seconds: u64,
    /// Answer given by the static fallback prompt after a cancelled sign-in.
    pub fallback_on_cancel: bool,
}

impl InteractiveConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self { timeout_seconds: DEFAULT_INTERACTIVE_TIMEOUT.as_secs(), fallback_on_cancel: true }
    }
}

/// Where secrets and small state are persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Service name under which keyring entries are created.
    pub keyring_service: String,
    /// JSON file backing the memento.
    pub state_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keyring_service: "credcache".to_string(),
            state_path: "credcache-state.json".to_string(),
        }
    }
}

/// Logging output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `credcache_core=debug`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
