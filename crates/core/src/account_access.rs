//! Broker account allow-list
//!
//! When tokens come from a native broker, every account signed in on the
//! machine is visible to every client. [`ScopedAccountAccess`] records which
//! `home_account_id`s this identity has actually signed in, so only those
//! are surfaced.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use credcache_common::{Emitter, Subscription};
use credcache_domain::constants::account_access_secret_key;
use credcache_domain::{AccountInfo, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::ports::SecretStorage;
use crate::secret_store::SecretJsonStore;
use crate::tasks::spawn_follow_up;

pub struct ScopedAccountAccess {
    store: SecretJsonStore<Vec<String>>,
    allowed: RwLock<Vec<String>>,
    changes: Emitter<()>,
    update_lock: tokio::sync::Mutex<()>,
    storage_subscription: Mutex<Option<Subscription>>,
}

impl ScopedAccountAccess {
    pub fn new(
        storage: Arc<dyn SecretStorage>,
        cloud_name: &str,
        client_id: &str,
        authority: &str,
    ) -> Arc<Self> {
        let key = account_access_secret_key(cloud_name, client_id, authority);
        let access = Arc::new(Self {
            store: SecretJsonStore::new(storage, key),
            allowed: RwLock::new(Vec::new()),
            changes: Emitter::new(),
            update_lock: tokio::sync::Mutex::new(()),
            storage_subscription: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&access);
        let subscription = access.store.on_did_change(move || {
            let Some(access) = weak.upgrade() else { return };
            spawn_follow_up("account_access_update", async move {
                if let Err(err) = access.update().await {
                    warn!(error = %err, "failed to reload account allow-list");
                }
            });
        });
        *access.storage_subscription.lock() = Some(subscription);
        access
    }

    pub async fn initialize(&self) -> Result<()> {
        self.update().await
    }

    pub fn is_allowed_access(&self, account: &AccountInfo) -> bool {
        self.allowed.read().iter().any(|id| *id == account.home_account_id)
    }

    pub async fn set_allowed_access(&self, account: &AccountInfo, allowed: bool) -> Result<()> {
        let current = self.allowed.read().clone();
        let id = &account.home_account_id;
        let next: Vec<String> = if allowed {
            if current.contains(id) {
                return Ok(());
            }
            current.into_iter().chain(std::iter::once(id.clone())).collect()
        } else {
            current.into_iter().filter(|existing| existing != id).collect()
        };
        self.store.store(&next).await?;
        self.update().await
    }

    /// Reload from storage; fires the change feed only when the set of ids
    /// differs from what was held before.
    pub async fn update(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        let loaded = match self.store.get().await {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                warn!(
                    key = %self.store.key(),
                    error = %err,
                    "account allow-list unreadable; treating as empty"
                );
                Vec::new()
            }
        };

        let changed = {
            let mut allowed = self.allowed.write();
            let changed = {
                let before: HashSet<&String> = allowed.iter().collect();
                let after: HashSet<&String> = loaded.iter().collect();
                before != after
            };
            *allowed = loaded;
            changed
        };

        if changed {
            debug!(key = %self.store.key(), "account allow-list changed");
            self.changes.fire(&());
        }
        Ok(())
    }

    pub fn on_did_account_access_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.changes.subscribe(move |_: &()| listener())
    }

    pub fn allowed_ids(&self) -> Vec<String> {
        self.allowed.read().clone()
    }

    pub fn dispose(&self) {
        self.storage_subscription.lock().take();
    }
}
