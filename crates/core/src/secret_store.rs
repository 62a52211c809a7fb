//! Typed views over secret storage
//!
//! [`SecretJsonStore`] keeps one JSON document under one secret key and
//! narrows the storage change feed to that key. [`SecretStorageCachePlugin`]
//! is the hook an identity-provider client uses to persist its token cache.

use std::marker::PhantomData;
use std::sync::Arc;

use credcache_common::Subscription;
use credcache_domain::{CredCacheError, IdentityKey, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::ports::{SecretStorage, SecretStorageChange};

/// JSON document stored under a single secret key.
pub struct SecretJsonStore<T> {
    storage: Arc<dyn SecretStorage>,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SecretJsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(storage: Arc<dyn SecretStorage>, key: impl Into<String>) -> Self {
        Self { storage, key: key.into(), _marker: PhantomData }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read and decode the document.
    ///
    /// Missing or empty values are `Ok(None)`. Undecodable values are
    /// reported as [`CredCacheError::Serialization`].
    pub async fn get(&self) -> Result<Option<T>> {
        match self.storage.get(&self.key).await? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                CredCacheError::Serialization(format!("corrupt value under {}: {e}", self.key))
            }),
        }
    }

    /// Like [`get`](Self::get), but a corrupt value is deleted and read as
    /// absent.
    pub async fn get_or_clear(&self) -> Result<Option<T>> {
        match self.get().await {
            Err(CredCacheError::Serialization(reason)) => {
                warn!(key = %self.key, %reason, "clearing corrupt secret");
                self.delete().await?;
                Ok(None)
            }
            other => other,
        }
    }

    pub async fn store(&self, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.storage.store(&self.key, &raw).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.storage.delete(&self.key).await
    }

    /// Fires whenever this store's key changes.
    pub fn on_did_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = self.key.clone();
        self.storage.on_did_change(Box::new(move |change: &SecretStorageChange| {
            if change.key == key {
                listener();
            }
        }))
    }
}

/// Token-cache persistence hook handed to identity-provider clients.
///
/// The blob is opaque to the cache; it lives under
/// `pca:{"clientId":…,"authority":…}` so identities never collide.
pub struct SecretStorageCachePlugin {
    storage: Arc<dyn SecretStorage>,
    key: String,
}

impl SecretStorageCachePlugin {
    pub fn new(storage: Arc<dyn SecretStorage>, identity: &IdentityKey) -> Self {
        Self { storage, key: format!("pca:{}", identity.to_storage_key()) }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the serialized token cache, if any.
    pub async fn before_cache_access(&self) -> Result<Option<String>> {
        Ok(self.storage.get(&self.key).await?.filter(|blob| !blob.is_empty()))
    }

    /// Persist the serialized token cache when the client changed it.
    pub async fn after_cache_access(&self, blob: &str, cache_has_changed: bool) -> Result<()> {
        if !cache_has_changed {
            return Ok(());
        }
        debug!(key = %self.key, bytes = blob.len(), "persisting token cache");
        self.storage.store(&self.key, blob).await
    }

    /// Fires whenever the persisted token cache changes.
    pub fn on_did_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = self.key.clone();
        self.storage.on_did_change(Box::new(move |change: &SecretStorageChange| {
            if change.key == key {
                listener();
            }
        }))
    }
}
