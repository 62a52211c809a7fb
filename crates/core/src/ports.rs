//! Port interfaces for the credential cache
//!
//! These traits define the boundaries between the cache logic and the
//! host or infrastructure implementations it runs against.

use std::sync::Arc;

use async_trait::async_trait;
use credcache_common::Subscription;
use credcache_domain::{
    AccountInfo, AuthenticationResult, IdentityKey, InteractiveRequest, LegacySession,
    MicrosoftAccountType, RefreshTokenRequest, Result, SilentFlowRequest,
};
use serde_json::Value;

use crate::secret_store::SecretStorageCachePlugin;

/// Boxed synchronous change listener.
pub type ChangeListener<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A secret was written or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStorageChange {
    pub key: String,
}

/// Encrypted key-value store with a change feed
#[async_trait]
pub trait SecretStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn store(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribe to changes of any key, including changes made by other
    /// processes when the backend can observe them.
    fn on_did_change(&self, listener: ChangeListener<SecretStorageChange>) -> Subscription;
}

/// Small persisted objects (global state)
#[async_trait]
pub trait Memento: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    async fn update(&self, key: &str, value: Value) -> Result<()>;
}

/// Identity-provider client for one `(client_id, authority)` pair.
///
/// Implementations persist their token cache through the
/// [`SecretStorageCachePlugin`] they were created with.
#[async_trait]
pub trait PublicClientApplication: Send + Sync {
    async fn acquire_token_silent(&self, request: &SilentFlowRequest)
        -> Result<AuthenticationResult>;

    async fn acquire_token_interactive(
        &self,
        request: &InteractiveRequest,
    ) -> Result<AuthenticationResult>;

    async fn acquire_token_by_refresh_token(
        &self,
        request: &RefreshTokenRequest,
    ) -> Result<AuthenticationResult>;

    async fn get_all_accounts(&self) -> Result<Vec<AccountInfo>>;

    async fn remove_account(&self, account: &AccountInfo) -> Result<()>;

    /// Whether tokens are brokered by a native OS component.
    fn is_broker_available(&self) -> bool;
}

/// Everything a client needs to be constructed.
#[derive(Clone)]
pub struct PublicClientConfig {
    pub key: IdentityKey,
    pub cache_plugin: Arc<SecretStorageCachePlugin>,
}

/// Builds identity-provider clients
pub trait PublicClientFactory: Send + Sync {
    fn create(&self, config: &PublicClientConfig) -> Result<Arc<dyn PublicClientApplication>>;
}

/// Usage telemetry sink
pub trait TelemetryReporter: Send + Sync {
    fn send_login_event(&self, scopes: &[String]);

    fn send_login_failed_event(&self);

    fn send_logout_event(&self);

    fn send_logout_failed_event(&self);

    fn send_account_event(&self, scopes: &[String], account_type: MicrosoftAccountType);
}

/// Asks whether to retry a cancelled sign-in with the alternate flow.
#[async_trait]
pub trait FallbackPrompt: Send + Sync {
    async fn confirm_fallback(&self) -> bool;
}

/// Source of refresh-token sessions written by the legacy implementation
#[async_trait]
pub trait LegacySessionStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<LegacySession>>;
}
