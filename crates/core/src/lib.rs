//! # credcache core
//!
//! Credential cache business logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for secret storage, the memento, the
//!   identity-provider client, telemetry and prompts
//! - Per-identity token caches with serialized silent acquisition and
//!   background refresh
//! - The cache manager and the outward authentication provider
//!
//! ## Architecture Principles
//! - Only depends on `credcache-common` and `credcache-domain`
//! - No keyring, HTTP, or filesystem code
//! - All external dependencies via traits

pub mod account_access;
pub mod identity;
pub mod legacy;
pub mod manager;
pub mod ports;
pub mod provider;
pub mod secret_store;
pub mod sign_in;
mod tasks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use account_access::ScopedAccountAccess;
pub use identity::{CacheState, CachedIdentity, IdentityServices};
pub use legacy::SecretLegacySessionStore;
pub use manager::IdentityCacheManager;
pub use ports::{
    ChangeListener, FallbackPrompt, LegacySessionStore, Memento, PublicClientApplication,
    PublicClientConfig, PublicClientFactory, SecretStorage, SecretStorageChange,
    TelemetryReporter,
};
pub use provider::{authority_url, MicrosoftAuthProvider, ProviderPorts};
pub use secret_store::{SecretJsonStore, SecretStorageCachePlugin};
pub use sign_in::{SignInStage, StageOutcome};
