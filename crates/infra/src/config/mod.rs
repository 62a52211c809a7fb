//! Configuration loading
//!
//! Reads a [`credcache_domain::CredCacheConfig`] from a TOML or JSON file and
//! layers `CREDCACHE_*` environment overrides on top.

pub mod loader;

// Re-export commonly used items
pub use loader::{apply_env_overrides, load, load_from_file, probe_config_paths};
