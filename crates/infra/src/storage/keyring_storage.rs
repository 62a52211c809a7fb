//! OS keyring-backed [`SecretStorage`]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use credcache_common::{Emitter, Subscription};
use credcache_core::{ChangeListener, SecretStorage, SecretStorageChange};
use credcache_domain::{CredCacheError, Result};
use keyring::Entry;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::InfraError;

/// One keyring entry per secret key, all under a single service name.
///
/// Keyring calls block, so each runs on the blocking pool.
///
/// The change feed only observes writes made through this instance; the OS
/// keyring has no portable cross-process notification. With this storage the
/// identity manager never sees another process change the key list, and its
/// cross-process reconciliation only runs when a host calls
/// `IdentityCacheManager::handle_secret_storage_change` itself. Likewise a
/// token cache written by another process is only picked up on the next
/// account refresh. Hosts that need live reconciliation must supply a
/// [`SecretStorage`] whose feed reports foreign writes.
pub struct KeyringSecretStorage {
    service: String,
    entries: Mutex<HashMap<String, Arc<Entry>>>,
    changes: Emitter<SecretStorageChange>,
}

impl KeyringSecretStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
            changes: Emitter::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Arc<Entry>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(Entry::new(&self.service, key).map_err(InfraError::from)?);
        entries.insert(key.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    fn notify(&self, key: &str) {
        self.changes.fire(&SecretStorageChange { key: key.to_string() });
    }
}

async fn run_blocking<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, keyring::Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|err| CredCacheError::Internal(format!("keyring task failed: {err}")))?
        .map_err(|err| InfraError::from(err).into())
}

#[async_trait]
impl SecretStorage for KeyringSecretStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = self.entry(key)?;
        match run_blocking(move || entry.get_password()).await {
            Ok(value) => Ok(Some(value)),
            Err(CredCacheError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        let entry = self.entry(key)?;
        let value = value.to_string();
        run_blocking(move || entry.set_password(&value)).await?;
        debug!(service = %self.service, key, "secret stored");
        self.notify(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let entry = self.entry(key)?;
        match run_blocking(move || entry.delete_credential()).await {
            Ok(()) => {
                debug!(service = %self.service, key, "secret deleted");
                self.notify(key);
                Ok(())
            }
            Err(CredCacheError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn on_did_change(&self, listener: ChangeListener<SecretStorageChange>) -> Subscription {
        self.changes.subscribe(move |change| listener(change))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn storage() -> KeyringSecretStorage {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        KeyringSecretStorage::new("credcache-test")
    }

    #[tokio::test]
    async fn test_round_trip_and_missing_value() {
        let storage = storage();

        assert_eq!(storage.get("missing").await.unwrap(), None);
        storage.store("k", "v1").await.unwrap();
        storage.store("k", "v2").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v2"));

        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }

    /// Validates the local change feed.
    ///
    /// Assertions:
    /// - writes and real deletes are reported with their key
    /// - deleting an absent secret is a silent no-op
    #[tokio::test]
    async fn test_change_feed_reports_local_writes() {
        let storage = storage();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = storage.on_did_change(Box::new(move |change: &SecretStorageChange| {
            sink.lock().push(change.key.clone());
        }));

        storage.store("a", "1").await.unwrap();
        storage.delete("a").await.unwrap();
        storage.delete("never-written").await.unwrap();

        assert_eq!(*seen.lock(), vec!["a".to_string(), "a".to_string()]);
    }

    /// Validates the feed stays silent for writes made through another
    /// instance, as another process would make them.
    ///
    /// Assertions:
    /// - a write through a second instance is not reported to the first
    #[tokio::test]
    async fn test_change_feed_ignores_other_instances() {
        let storage = storage();
        let other = KeyringSecretStorage::new(storage.service().to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = storage.on_did_change(Box::new(move |_: &SecretStorageChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        other.store("identities", "[]").await.unwrap();
        other.delete("identities").await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let storage = storage();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = storage.on_did_change(Box::new(move |_: &SecretStorageChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        storage.store("a", "1").await.unwrap();
        drop(sub);
        storage.store("a", "2").await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
