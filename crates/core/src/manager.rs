//! Registry of cached identities
//!
//! [`IdentityCacheManager`] owns every [`CachedIdentity`] of one cloud,
//! keyed by the canonical `(client_id, authority)` JSON string. The set of
//! active keys is persisted so identities survive a restart, and changes to
//! that list made by other processes are reconciled here.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use credcache_common::{Emitter, Subscription, SubscriptionSet};
use credcache_domain::constants::identity_list_secret_key;
use credcache_domain::{AccountsChangeEvent, IdentityKey, RefreshTokenRequest, Result};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::identity::{CachedIdentity, IdentityServices};
use crate::secret_store::SecretJsonStore;
use crate::tasks::spawn_follow_up;

struct Registration {
    identity: Arc<CachedIdentity>,
    /// Forwarding and removal hooks; dropped when the identity is retired.
    _subscriptions: SubscriptionSet,
}

pub struct IdentityCacheManager {
    services: IdentityServices,
    key_store: SecretJsonStore<Vec<String>>,
    identities: RwLock<HashMap<String, Registration>>,
    create_lock: tokio::sync::Mutex<()>,
    accounts_changed: Emitter<AccountsChangeEvent>,
    storage_subscription: Mutex<Option<Subscription>>,
    /// Sorted key list of this manager's latest write. A change notification
    /// carrying exactly this list is our own echo, or a stale read taken
    /// while that write was pending.
    last_written: Mutex<Option<Vec<String>>>,
    /// Keys retired here whose removal may not have reached storage yet.
    /// Cleared once a read of the list no longer carries them.
    retired: Mutex<HashSet<String>>,
    weak_self: Weak<Self>,
}

impl IdentityCacheManager {
    pub fn new(services: IdentityServices) -> Arc<Self> {
        let key = identity_list_secret_key(&services.cloud_name);
        let manager = Arc::new_cyclic(|weak_self| Self {
            key_store: SecretJsonStore::new(Arc::clone(&services.storage), key),
            services,
            identities: RwLock::new(HashMap::new()),
            create_lock: tokio::sync::Mutex::new(()),
            accounts_changed: Emitter::new(),
            storage_subscription: Mutex::new(None),
            last_written: Mutex::new(None),
            retired: Mutex::new(HashSet::new()),
            weak_self: weak_self.clone(),
        });

        let weak = manager.weak_self.clone();
        let subscription = manager.key_store.on_did_change(move || {
            let Some(manager) = weak.upgrade() else { return };
            spawn_follow_up("identity_list_change", async move {
                manager.handle_secret_storage_change().await;
            });
        });
        *manager.storage_subscription.lock() = Some(subscription);
        manager
    }

    /// Rebuild every persisted identity.
    ///
    /// Identities are reconstructed concurrently and one failure does not
    /// stop the others. Identities left without accounts are dropped and the
    /// key list is re-persisted once.
    pub async fn initialize(&self) -> Result<()> {
        debug!("initializing identity cache manager");
        let mut stored = self.key_store.get_or_clear().await?.unwrap_or_default();
        stored.sort();
        stored.dedup();
        if stored.is_empty() {
            return Ok(());
        }

        let mut keys = Vec::with_capacity(stored.len());
        for raw in &stored {
            match IdentityKey::from_storage_key(raw) {
                Ok(key) => keys.push(key),
                Err(err) => error!(key = %raw, error = %err, "skipping unparseable identity key"),
            }
        }

        let results = {
            let _guard = self.create_lock.lock().await;
            join_all(keys.into_iter().map(|key| self.create_identity_locked(key))).await
        };

        let mut pruned = false;
        for result in results {
            match result {
                Ok(identity) if identity.accounts().is_empty() => {
                    debug!(
                        client_id = %identity.client_id(),
                        authority = %identity.authority(),
                        "dropping identity without accounts"
                    );
                    self.retire(&identity.key().to_storage_key());
                    pruned = true;
                }
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "failed to restore identity");
                    pruned = true;
                }
            }
        }
        if pruned {
            self.store_keys().await?;
        }

        info!(identities = self.identities.read().len(), "identity cache manager initialized");
        Ok(())
    }

    /// Return the identity for `(client_id, authority)`, creating,
    /// initializing and persisting it on first use.
    pub async fn get_or_create(
        &self,
        client_id: &str,
        authority: &str,
    ) -> Result<Arc<CachedIdentity>> {
        let key = IdentityKey::new(client_id, authority);
        let storage_key = key.to_storage_key();
        if let Some(identity) = self.lookup(&storage_key) {
            debug!(client_id, authority, "identity cache hit");
            return Ok(identity);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(identity) = self.lookup(&storage_key) {
            return Ok(identity);
        }
        debug!(client_id, authority, "identity cache miss; creating");
        self.retired.lock().remove(&storage_key);
        let identity = self.create_identity_locked(key).await?;
        self.store_keys().await?;
        Ok(identity)
    }

    /// [`get_or_create`](Self::get_or_create), then seed the identity with
    /// refresh tokens from the legacy session store.
    ///
    /// Tokens that fail to redeem are logged and skipped.
    pub async fn get_or_create_with_migration(
        &self,
        client_id: &str,
        authority: &str,
        refresh_tokens: &[String],
    ) -> Result<Arc<CachedIdentity>> {
        let identity = self.get_or_create(client_id, authority).await?;
        if refresh_tokens.is_empty() {
            return Ok(identity);
        }

        debug!(client_id, authority, count = refresh_tokens.len(), "migrating refresh tokens");
        for refresh_token in refresh_tokens {
            let request = RefreshTokenRequest {
                refresh_token: refresh_token.clone(),
                scopes: Vec::new(),
                force_cache: true,
            };
            match identity.acquire_token_by_refresh_token(request).await {
                Ok(result) => debug!(
                    client_id,
                    authority,
                    account = %result.account.home_account_id,
                    "refresh token migrated"
                ),
                Err(err) => {
                    error!(client_id, authority, error = %err, "refresh token migration failed");
                }
            }
        }
        identity.initialize().await?;
        Ok(identity)
    }

    pub fn get_all(&self) -> Vec<Arc<CachedIdentity>> {
        self.identities.read().values().map(|r| Arc::clone(&r.identity)).collect()
    }

    pub fn keys(&self) -> Vec<IdentityKey> {
        self.identities.read().values().map(|r| r.identity.key().clone()).collect()
    }

    pub fn accounts_change_emitter(&self) -> &Emitter<AccountsChangeEvent> {
        &self.accounts_changed
    }

    pub fn on_did_accounts_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AccountsChangeEvent) + Send + Sync + 'static,
    {
        self.accounts_changed.subscribe(listener)
    }

    /// Reconcile with a key list written by another process.
    pub async fn handle_secret_storage_change(&self) {
        if self.storage_subscription.lock().is_none() {
            debug!("manager disposed; ignoring identity list change");
            return;
        }
        debug!(key = %self.key_store.key(), "identity list changed in storage");
        let remote = match self.key_store.get().await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(error = %err, "identity list corrupt; writing back local keys");
                if let Err(err) = self.store_keys().await {
                    error!(error = %err, "failed to rewrite identity list");
                }
                return;
            }
        };

        let Some(remote) = remote else {
            debug!("identity list deleted; disposing all identities");
            let drained: Vec<Registration> =
                self.identities.write().drain().map(|(_, registration)| registration).collect();
            for registration in drained {
                registration.identity.dispose();
            }
            return;
        };

        let mut sorted = remote.clone();
        sorted.sort();
        sorted.dedup();
        self.retired.lock().retain(|key| sorted.binary_search(key).is_ok());
        if self.last_written.lock().as_ref() == Some(&sorted) {
            debug!("identity list matches our latest write; nothing to reconcile");
            return;
        }

        let mut remote: HashSet<String> = remote.into_iter().collect();
        for local in self.identities.read().keys() {
            if !remote.remove(local) {
                debug!(key = %local, "identity removed by another process");
            }
        }

        for raw in remote {
            if self.retired.lock().contains(&raw) {
                debug!(key = %raw, "identity retired locally; waiting for list to catch up");
                continue;
            }
            let key = match IdentityKey::from_storage_key(&raw) {
                Ok(key) => key,
                Err(err) => {
                    error!(key = %raw, error = %err, "ignoring unparseable identity key");
                    continue;
                }
            };
            debug!(
                client_id = %key.client_id,
                authority = %key.authority,
                "creating identity added by another process"
            );
            if let Err(err) = self.create_identity(key).await {
                error!(key = %raw, error = %err, "failed to create identity from storage change");
            }
        }
    }

    pub fn dispose(&self) {
        self.storage_subscription.lock().take();
        let drained: Vec<Registration> =
            self.identities.write().drain().map(|(_, registration)| registration).collect();
        for registration in drained {
            registration.identity.dispose();
        }
    }

    fn lookup(&self, storage_key: &str) -> Option<Arc<CachedIdentity>> {
        self.identities.read().get(storage_key).map(|r| Arc::clone(&r.identity))
    }

    async fn create_identity(&self, key: IdentityKey) -> Result<Arc<CachedIdentity>> {
        let _guard = self.create_lock.lock().await;
        if let Some(identity) = self.lookup(&key.to_storage_key()) {
            return Ok(identity);
        }
        self.create_identity_locked(key).await
    }

    /// Build, register and initialize. Caller holds `create_lock`.
    async fn create_identity_locked(&self, key: IdentityKey) -> Result<Arc<CachedIdentity>> {
        let storage_key = key.to_storage_key();
        let identity = CachedIdentity::new(key, self.services.clone())?;

        // Registered before initialize so the initial account diff is forwarded.
        let subscriptions = SubscriptionSet::new();
        let forward = self.accounts_changed.clone();
        subscriptions.add(identity.on_did_accounts_change(move |event| forward.fire(event)));

        let weak_manager = self.weak_self.clone();
        let retired_key = storage_key.clone();
        subscriptions.add(identity.on_did_remove_last_account(move || {
            let Some(manager) = weak_manager.upgrade() else { return };
            manager.retired.lock().insert(retired_key.clone());
            manager.retire(&retired_key);
            debug!(key = %retired_key, "identity retired; persisting identity list");
            spawn_follow_up("store_identity_list", async move {
                if let Err(err) = manager.store_keys().await {
                    error!(error = %err, "failed to persist identity list");
                }
            });
        }));

        self.identities.write().insert(
            storage_key.clone(),
            Registration { identity: Arc::clone(&identity), _subscriptions: subscriptions },
        );

        if let Err(err) = identity.initialize().await {
            self.retire(&storage_key);
            return Err(err);
        }
        Ok(identity)
    }

    /// Unregister and dispose an identity.
    fn retire(&self, storage_key: &str) {
        let removed = self.identities.write().remove(storage_key);
        if let Some(registration) = removed {
            registration.identity.dispose();
        }
    }

    async fn store_keys(&self) -> Result<()> {
        let mut keys: Vec<String> = self.identities.read().keys().cloned().collect();
        keys.sort();
        *self.last_written.lock() = Some(keys.clone());
        self.key_store.store(&keys).await
    }
}
