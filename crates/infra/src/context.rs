//! Composition root
//!
//! [`AuthContext`] wires the infrastructure adapters into a
//! [`MicrosoftAuthProvider`].

use std::sync::Arc;

use credcache_common::SystemClock;
use credcache_core::{
    LegacySessionStore, Memento, MicrosoftAuthProvider, ProviderPorts, SecretLegacySessionStore,
    SecretStorage,
};
use credcache_domain::{CredCacheConfig, Result};
use tracing::info;

use crate::browser::{BrowserOpener, CommandBrowserOpener};
use crate::http::HttpClient;
use crate::identity::{OAuthClientFactory, OAuthClientServices, UriHandlerLoopback};
use crate::observability::TracingTelemetryReporter;
use crate::prompt::StaticFallbackPrompt;
use crate::storage::{JsonFileMemento, KeyringSecretStorage};

/// A ready-to-initialize provider plus the handles a host needs around it.
pub struct AuthContext {
    pub config: CredCacheConfig,
    pub provider: Arc<MicrosoftAuthProvider>,
    /// Forward redirect URLs received by the host here.
    pub uri_handler: Arc<UriHandlerLoopback>,
    pub telemetry: Arc<TracingTelemetryReporter>,
}

impl AuthContext {
    /// Keyring secrets, a JSON state file and the system browser.
    pub fn from_config(config: CredCacheConfig) -> Result<Self> {
        let storage = Arc::new(KeyringSecretStorage::new(config.storage.keyring_service.clone()));
        let memento = Arc::new(JsonFileMemento::open(&config.storage.state_path)?);
        Self::with_adapters(config, storage, memento, Arc::new(CommandBrowserOpener::new()))
    }

    /// Wire the provider over caller-supplied storage and browser.
    pub fn with_adapters(
        config: CredCacheConfig,
        storage: Arc<dyn SecretStorage>,
        memento: Arc<dyn Memento>,
        browser: Arc<dyn BrowserOpener>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("credcache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let uri_handler = Arc::new(UriHandlerLoopback::new());
        let telemetry = Arc::new(TracingTelemetryReporter::new());
        let clock = Arc::new(SystemClock);

        let factory = OAuthClientFactory::new(OAuthClientServices {
            http,
            browser,
            uri_handler: Arc::clone(&uri_handler),
            clock: clock.clone(),
            refresh_margin: config.refresh.margin(),
        });
        let legacy_sessions: Arc<dyn LegacySessionStore> =
            Arc::new(SecretLegacySessionStore::new(Arc::clone(&storage)));

        let provider = MicrosoftAuthProvider::new(
            &config,
            ProviderPorts {
                storage,
                memento,
                factory: Arc::new(factory),
                telemetry: telemetry.clone(),
                prompt: Arc::new(StaticFallbackPrompt::new(config.interactive.fallback_on_cancel)),
                legacy_sessions: Some(legacy_sessions),
                clock,
            },
        );
        info!(cloud = config.cloud.name(), "credential cache context ready");

        Ok(Self { config, provider: Arc::new(provider), uri_handler, telemetry })
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.provider.dispose();
    }
}
