//! Sessions persisted by the pre-cache implementation
//!
//! The legacy format keeps a JSON array of session keys under
//! [`LEGACY_KEY_LIST`] and one JSON [`LegacySession`] per key.

use std::sync::Arc;

use async_trait::async_trait;
use credcache_domain::constants::LEGACY_KEY_LIST;
use credcache_domain::{LegacySession, Result};
use tracing::warn;

use crate::ports::{LegacySessionStore, SecretStorage};
use crate::secret_store::SecretJsonStore;

/// Reads legacy sessions out of secret storage.
pub struct SecretLegacySessionStore {
    storage: Arc<dyn SecretStorage>,
}

impl SecretLegacySessionStore {
    pub fn new(storage: Arc<dyn SecretStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl LegacySessionStore for SecretLegacySessionStore {
    async fn get_all(&self) -> Result<Vec<LegacySession>> {
        let key_list: SecretJsonStore<Vec<String>> =
            SecretJsonStore::new(Arc::clone(&self.storage), LEGACY_KEY_LIST);
        let keys = key_list.get().await?.unwrap_or_default();

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            let entry: SecretJsonStore<LegacySession> =
                SecretJsonStore::new(Arc::clone(&self.storage), key.clone());
            match entry.get().await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(err) => warn!(%key, error = %err, "skipping unreadable legacy session"),
            }
        }
        Ok(sessions)
    }
}
