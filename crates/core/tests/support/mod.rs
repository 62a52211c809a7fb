//! Shared test helpers for `credcache-core` integration tests.
//!
//! A [`Harness`] owns one set of in-memory ports. Building a second manager
//! or provider from the same harness simulates a restart, or a second
//! process sharing the same secret storage.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use credcache_common::MockClock;
use credcache_core::testing::{
    MockBackend, MockClientFactory, MockLegacySessionStore, MockMemento, MockSecretStorage,
    RecordingTelemetry, ScriptedPrompt,
};
use credcache_core::{
    IdentityCacheManager, IdentityServices, LegacySessionStore, MicrosoftAuthProvider,
    ProviderPorts,
};
use credcache_domain::constants::{identity_list_secret_key, DEFAULT_CLIENT_ID};
use credcache_domain::{BrokerConfig, CredCacheConfig, IdentityKey, LegacySession};

pub const CLIENT: &str = DEFAULT_CLIENT_ID;
pub const AUTHORITY: &str = "https://login.microsoftonline.com/organizations";
pub const CLOUD: &str = "AzureCloud";

pub struct Harness {
    pub storage: Arc<MockSecretStorage>,
    pub memento: Arc<MockMemento>,
    pub factory: Arc<MockClientFactory>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub clock: MockClock,
}

impl Harness {
    pub fn new() -> Self {
        let clock = MockClock::new();
        Self {
            storage: Arc::new(MockSecretStorage::new()),
            memento: Arc::new(MockMemento::new()),
            factory: Arc::new(MockClientFactory::new(Arc::new(clock.clone()))),
            telemetry: Arc::new(RecordingTelemetry::new()),
            clock,
        }
    }

    pub fn services(&self) -> IdentityServices {
        IdentityServices {
            storage: self.storage.clone(),
            memento: self.memento.clone(),
            factory: self.factory.clone(),
            clock: Arc::new(self.clock.clone()),
            cloud_name: CLOUD.to_string(),
            refresh_margin: Duration::from_secs(300),
            interactive_timeout: Duration::from_secs(60),
            broker: BrokerConfig::default(),
        }
    }

    pub fn manager(&self) -> Arc<IdentityCacheManager> {
        IdentityCacheManager::new(self.services())
    }

    pub fn provider(&self, prompt: Arc<ScriptedPrompt>) -> MicrosoftAuthProvider {
        self.provider_with_legacy(prompt, None)
    }

    pub fn provider_with_legacy(
        &self,
        prompt: Arc<ScriptedPrompt>,
        legacy: Option<Vec<LegacySession>>,
    ) -> MicrosoftAuthProvider {
        let legacy_sessions = legacy.map(|sessions| {
            Arc::new(MockLegacySessionStore::new(sessions)) as Arc<dyn LegacySessionStore>
        });
        let mut config = CredCacheConfig::default();
        config.interactive.timeout_seconds = 60;
        MicrosoftAuthProvider::new(
            &config,
            ProviderPorts {
                storage: self.storage.clone(),
                memento: self.memento.clone(),
                factory: self.factory.clone(),
                telemetry: self.telemetry.clone(),
                prompt,
                legacy_sessions,
                clock: Arc::new(self.clock.clone()),
            },
        )
    }

    /// Backend of the default identity.
    pub fn backend(&self) -> Arc<MockBackend> {
        self.factory.backend(CLIENT, AUTHORITY)
    }

    pub fn backend_for(&self, client_id: &str, authority: &str) -> Arc<MockBackend> {
        self.factory.backend(client_id, authority)
    }

    /// Persisted identity key list, parsed.
    pub fn stored_keys(&self) -> Option<Vec<String>> {
        let raw = self.storage.raw(&identity_list_secret_key(CLOUD))?;
        serde_json::from_str(&raw).ok()
    }

    /// Overwrite the identity key list as another process would.
    pub fn write_keys_external(&self, keys: &[IdentityKey]) {
        let keys: Vec<String> = keys.iter().map(IdentityKey::to_storage_key).collect();
        let raw = serde_json::to_string(&keys).unwrap_or_default();
        self.storage.set_external(&identity_list_secret_key(CLOUD), &raw);
    }

    pub fn write_raw_keys_external(&self, raw: &str) {
        self.storage.set_external(&identity_list_secret_key(CLOUD), raw);
    }

    pub fn remove_keys_external(&self) {
        self.storage.remove_external(&identity_list_secret_key(CLOUD));
    }
}

pub fn default_key() -> IdentityKey {
    IdentityKey::new(CLIENT, AUTHORITY)
}

pub fn scopes(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}
