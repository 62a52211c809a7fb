//! Per-identity token cache
//!
//! A [`CachedIdentity`] owns the identity-provider client for one
//! `(client_id, authority)` pair. It serializes silent acquisitions, keeps a
//! snapshot of the client's accounts, and re-arms a background refresh for
//! every token it hands out.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use credcache_common::{
    race_cancellation_and_timeout, Clock, DelayerByKey, Emitter, Sequencer, Subscription,
    SubscriptionSet,
};
use credcache_domain::constants::{last_removal_key, REDIRECT_URI};
use credcache_domain::{
    impl_label_conversions, AccountInfo, AccountsChangeEvent, AuthenticationResult, BrokerConfig,
    IdentityKey, InteractiveRequest, RefreshTokenRequest, Result, SilentFlowRequest,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::account_access::ScopedAccountAccess;
use crate::ports::{
    Memento, PublicClientApplication, PublicClientConfig, PublicClientFactory, SecretStorage,
};
use crate::secret_store::SecretStorageCachePlugin;
use crate::tasks::{into_domain_error, spawn_follow_up};

/// Collaborators and settings shared by every identity of one provider.
#[derive(Clone)]
pub struct IdentityServices {
    pub storage: Arc<dyn SecretStorage>,
    pub memento: Arc<dyn Memento>,
    pub factory: Arc<dyn PublicClientFactory>,
    pub clock: Arc<dyn Clock>,
    /// Cloud name used to namespace persisted secrets.
    pub cloud_name: String,
    /// Refresh this long before a token expires.
    pub refresh_margin: Duration,
    pub interactive_timeout: Duration,
    pub broker: BrokerConfig,
}

/// Lifecycle of a cached identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Initializing,
    Ready,
    /// Re-reading accounts after a change.
    Refreshing,
}

impl_label_conversions!(CacheState {
    Uninitialized => "uninitialized",
    Initializing => "initializing",
    Ready => "ready",
    Refreshing => "refreshing",
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RefreshKey {
    account_id: String,
    scope_signature: String,
}

pub struct CachedIdentity {
    key: IdentityKey,
    services: IdentityServices,
    cache_plugin: Arc<SecretStorageCachePlugin>,
    account_access: Arc<ScopedAccountAccess>,
    client: RwLock<Arc<dyn PublicClientApplication>>,
    last_created: RwLock<DateTime<Utc>>,
    is_broker_available: bool,
    accounts: RwLock<Vec<AccountInfo>>,
    state: RwLock<CacheState>,
    sequencer: Sequencer,
    refresh: DelayerByKey<RefreshKey>,
    update_lock: tokio::sync::Mutex<()>,
    last_seen_iat: Mutex<HashMap<String, Option<i64>>>,
    accounts_changed: Emitter<AccountsChangeEvent>,
    last_account_removed: Emitter<()>,
    subscriptions: SubscriptionSet,
    weak_self: Weak<Self>,
}

impl CachedIdentity {
    /// Build the identity and its client. Call [`initialize`](Self::initialize)
    /// before use.
    pub fn new(key: IdentityKey, services: IdentityServices) -> Result<Arc<Self>> {
        let cache_plugin =
            Arc::new(SecretStorageCachePlugin::new(Arc::clone(&services.storage), &key));
        let client = services.factory.create(&PublicClientConfig {
            key: key.clone(),
            cache_plugin: Arc::clone(&cache_plugin),
        })?;
        let is_broker_available = services.broker.enabled && client.is_broker_available();
        let account_access = ScopedAccountAccess::new(
            Arc::clone(&services.storage),
            &services.cloud_name,
            &key.client_id,
            &key.authority,
        );
        let last_created = services.clock.now();

        let identity = Arc::new_cyclic(|weak_self| Self {
            key,
            services,
            cache_plugin,
            account_access,
            client: RwLock::new(client),
            last_created: RwLock::new(last_created),
            is_broker_available,
            accounts: RwLock::new(Vec::new()),
            state: RwLock::new(CacheState::Uninitialized),
            sequencer: Sequencer::new(),
            refresh: DelayerByKey::new(),
            update_lock: tokio::sync::Mutex::new(()),
            last_seen_iat: Mutex::new(HashMap::new()),
            accounts_changed: Emitter::new(),
            last_account_removed: Emitter::new(),
            subscriptions: SubscriptionSet::new(),
            weak_self: weak_self.clone(),
        });
        identity.subscriptions.add(identity.register_change_source());
        Ok(identity)
    }

    fn register_change_source(&self) -> Subscription {
        let weak = self.weak_self.clone();
        let on_change = move || {
            let Some(identity) = weak.upgrade() else { return };
            spawn_follow_up("identity_update", async move {
                if let Err(err) = identity.update().await {
                    warn!(
                        client_id = %identity.key.client_id,
                        authority = %identity.key.authority,
                        error = %err,
                        "account refresh after storage change failed"
                    );
                }
            });
        };
        if self.is_broker_available {
            self.account_access.on_did_account_access_change(on_change)
        } else {
            self.cache_plugin.on_did_change(on_change)
        }
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn client_id(&self) -> &str {
        &self.key.client_id
    }

    pub fn authority(&self) -> &str {
        &self.key.authority
    }

    pub fn accounts(&self) -> Vec<AccountInfo> {
        self.accounts.read().clone()
    }

    pub fn state(&self) -> CacheState {
        *self.state.read()
    }

    /// Ready with no accounts left: the owner should dispose this identity.
    pub fn is_drained(&self) -> bool {
        self.state() == CacheState::Ready && self.accounts.read().is_empty()
    }

    pub fn is_broker_available(&self) -> bool {
        self.is_broker_available
    }

    pub fn last_created(&self) -> DateTime<Utc> {
        *self.last_created.read()
    }

    /// Refresh timers currently armed.
    pub fn pending_refreshes(&self) -> usize {
        self.refresh.pending_count()
    }

    fn client(&self) -> Arc<dyn PublicClientApplication> {
        Arc::clone(&self.client.read())
    }

    pub async fn initialize(&self) -> Result<()> {
        *self.state.write() = CacheState::Initializing;
        if self.is_broker_available {
            self.account_access.initialize().await?;
        }
        let result = self.update().await;
        *self.state.write() = CacheState::Ready;
        result
    }

    /// Acquire a token without user interaction.
    ///
    /// Calls are queued so that at most one runs against the client at a
    /// time. A result that came from the network arms the refresh timer and
    /// is reported as a changed account.
    pub async fn acquire_token_silent(
        &self,
        request: SilentFlowRequest,
    ) -> Result<AuthenticationResult> {
        let scopes = request.scopes.join(" ");
        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            %scopes,
            force_refresh = request.force_refresh,
            "acquire_token_silent starting"
        );

        let client = self.client();
        let result =
            self.sequencer.queue(|| async { client.acquire_token_silent(&request).await }).await?;

        if !result.from_cache && self.verify_if_using_broker(&result) {
            debug!(
                client_id = %self.key.client_id,
                authority = %self.key.authority,
                %scopes,
                "token refreshed from network; firing change"
            );
            self.setup_refresh(&result);
            self.accounts_changed.fire(&AccountsChangeEvent::changed(vec![result.account.clone()]));
        }
        Ok(result)
    }

    /// Run an interactive sign-in, bounded by the configured timeout and by
    /// `cancel`. Not queued behind silent acquisitions.
    pub async fn acquire_token_interactive(
        &self,
        request: InteractiveRequest,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult> {
        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            scopes = %request.scopes.join(" "),
            redirect = ?request.redirect,
            "acquire_token_interactive starting"
        );

        let client = self.client();
        let result = race_cancellation_and_timeout(
            "acquire_token_interactive",
            client.acquire_token_interactive(&request),
            cancel,
            self.services.interactive_timeout,
        )
        .await
        .map_err(into_domain_error)??;

        self.setup_refresh(&result);
        if self.is_broker_available {
            self.account_access.set_allowed_access(&result.account, true).await?;
        }
        if let Err(err) = self.update().await {
            warn!(
                client_id = %self.key.client_id,
                authority = %self.key.authority,
                error = %err,
                "account refresh after interactive sign-in failed"
            );
        }
        Ok(result)
    }

    /// Redeem a refresh token written by the legacy implementation.
    pub async fn acquire_token_by_refresh_token(
        &self,
        request: RefreshTokenRequest,
    ) -> Result<AuthenticationResult> {
        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            scopes = %request.scopes.join(" "),
            "acquire_token_by_refresh_token"
        );

        let result = self.client().acquire_token_by_refresh_token(&request).await?;
        self.setup_refresh(&result);
        if self.is_broker_available {
            self.account_access.set_allowed_access(&result.account, true).await?;
        }
        Ok(result)
    }

    /// Sign `account` out of this identity.
    ///
    /// The removal time is recorded first so other processes sharing the
    /// storage recreate their clients on their next account refresh.
    pub async fn remove_account(&self, account: &AccountInfo) -> Result<()> {
        let removed_at = self.services.clock.now();
        self.services
            .memento
            .update(
                &last_removal_key(&self.key.client_id, &self.key.authority),
                Value::String(removed_at.to_rfc3339()),
            )
            .await?;

        if self.is_broker_available {
            self.account_access.set_allowed_access(account, false).await?;
        } else {
            self.client().remove_account(account).await?;
        }
        self.update().await
    }

    /// Re-read the client's accounts and report the difference.
    pub async fn update(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        let resume_ready = {
            let mut state = self.state.write();
            if *state == CacheState::Ready {
                *state = CacheState::Refreshing;
                true
            } else {
                false
            }
        };

        let result = self.diff_accounts().await;

        if resume_ready {
            *self.state.write() = CacheState::Ready;
        }
        result
    }

    async fn diff_accounts(&self) -> Result<()> {
        let before = self.accounts();
        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            before = before.len(),
            "account update starting"
        );

        self.recreate_client_if_removed_elsewhere()?;

        let mut after = self.client().get_all_accounts().await?;
        if self.is_broker_available {
            after.retain(|account| self.account_access.is_allowed_access(account));
        }
        *self.accounts.write() = after.clone();

        let before_ids: HashSet<&str> = before.iter().map(|a| a.home_account_id.as_str()).collect();
        let after_ids: HashSet<&str> = after.iter().map(|a| a.home_account_id.as_str()).collect();
        let added: Vec<AccountInfo> = after
            .iter()
            .filter(|a| !before_ids.contains(a.home_account_id.as_str()))
            .cloned()
            .collect();
        let deleted: Vec<AccountInfo> = before
            .iter()
            .filter(|b| !after_ids.contains(b.home_account_id.as_str()))
            .cloned()
            .collect();

        if added.is_empty() && deleted.is_empty() {
            return Ok(());
        }

        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            added = added.len(),
            deleted = deleted.len(),
            "accounts changed"
        );
        for account in &deleted {
            self.refresh_cancel_for(&account.home_account_id);
        }
        self.accounts_changed.fire(&AccountsChangeEvent { added, changed: Vec::new(), deleted });

        if after.is_empty() {
            debug!(
                client_id = %self.key.client_id,
                authority = %self.key.authority,
                "last account removed"
            );
            self.last_account_removed.fire(&());
        }
        Ok(())
    }

    fn recreate_client_if_removed_elsewhere(&self) -> Result<()> {
        let key = last_removal_key(&self.key.client_id, &self.key.authority);
        let Some(removed_at) = self.services.memento.get(&key).as_ref().and_then(parse_timestamp)
        else {
            return Ok(());
        };
        if removed_at <= self.last_created() {
            return Ok(());
        }

        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            %removed_at,
            "removal detected; recreating client"
        );
        let client = self.services.factory.create(&PublicClientConfig {
            key: self.key.clone(),
            cache_plugin: Arc::clone(&self.cache_plugin),
        })?;
        *self.client.write() = client;
        *self.last_created.write() = self.services.clock.now();
        Ok(())
    }

    /// Broker results for an account whose `iat` claim did not move since
    /// the last one are not news. Non-broker results always pass.
    fn verify_if_using_broker(&self, result: &AuthenticationResult) -> bool {
        if !result.from_native_broker || !self.services.broker.dedupe_unchanged_iat {
            return true;
        }
        let issued_at = result.account.issued_at();
        let previous =
            self.last_seen_iat.lock().insert(result.account.home_account_id.clone(), issued_at);
        match previous {
            Some(seen) => seen != issued_at,
            None => true,
        }
    }

    /// Arm (or re-arm) the refresh timer for the result's account and scopes.
    fn setup_refresh(&self, result: &AuthenticationResult) {
        let now = self.services.clock.now();
        let margin = chrono::Duration::from_std(self.services.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let delay = (result.refresh_target() - now - margin).to_std().unwrap_or(Duration::ZERO);

        let key = RefreshKey {
            account_id: result.account.home_account_id.clone(),
            scope_signature: result.scopes.join(" "),
        };
        debug!(
            client_id = %self.key.client_id,
            authority = %self.key.authority,
            scopes = %key.scope_signature,
            delay_secs = delay.as_secs(),
            "scheduling token refresh"
        );

        let request = SilentFlowRequest {
            account: result.account.clone(),
            scopes: result.scopes.clone(),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            force_refresh: true,
        };
        let weak = self.weak_self.clone();
        self.refresh.trigger(key, delay, move || async move {
            let Some(identity) = weak.upgrade() else { return };
            if let Err(err) = identity.acquire_token_silent(request).await {
                warn!(
                    client_id = %identity.key.client_id,
                    authority = %identity.key.authority,
                    error = %err,
                    "background token refresh failed"
                );
            }
        });
    }

    fn refresh_cancel_for(&self, account_id: &str) {
        let cancelled = self.refresh.cancel_where(|key| key.account_id == account_id);
        if cancelled > 0 {
            debug!(
                client_id = %self.key.client_id,
                authority = %self.key.authority,
                cancelled,
                "cancelled refreshes for removed account"
            );
        }
    }

    pub fn on_did_accounts_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AccountsChangeEvent) + Send + Sync + 'static,
    {
        self.accounts_changed.subscribe(listener)
    }

    pub fn on_did_remove_last_account<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.last_account_removed.subscribe(move |_: &()| listener())
    }

    /// Cancel pending refreshes and stop listening for storage changes.
    pub fn dispose(&self) {
        self.refresh.cancel_all();
        self.subscriptions.dispose_all();
        self.account_access.dispose();
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            DateTime::parse_from_rfc3339(raw).ok().map(|parsed| parsed.with_timezone(&Utc))
        }
        Value::Number(millis) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use credcache_common::testing::wait_for;
    use credcache_common::MockClock;
    use credcache_domain::{CredCacheError, RedirectKind};

    use super::*;
    use crate::testing::{
        account, InteractiveStep, MockBackend, MockClientFactory, MockMemento, MockSecretStorage,
    };

    const CLIENT: &str = "client";
    const AUTHORITY: &str = "https://login.microsoftonline.com/organizations";

    struct Harness {
        storage: Arc<MockSecretStorage>,
        memento: Arc<MockMemento>,
        factory: Arc<MockClientFactory>,
        clock: MockClock,
        services: IdentityServices,
    }

    impl Harness {
        fn new(broker: BrokerConfig) -> Self {
            let clock = MockClock::new();
            let storage = Arc::new(MockSecretStorage::new());
            let memento = Arc::new(MockMemento::new());
            let factory = Arc::new(MockClientFactory::new(Arc::new(clock.clone())));
            let services = IdentityServices {
                storage: storage.clone(),
                memento: memento.clone(),
                factory: factory.clone(),
                clock: Arc::new(clock.clone()),
                cloud_name: "AzureCloud".to_string(),
                refresh_margin: Duration::from_secs(300),
                interactive_timeout: Duration::from_secs(60),
                broker,
            };
            Self { storage, memento, factory, clock, services }
        }

        fn identity(&self) -> Arc<CachedIdentity> {
            CachedIdentity::new(IdentityKey::new(CLIENT, AUTHORITY), self.services.clone()).unwrap()
        }

        fn backend(&self) -> Arc<MockBackend> {
            self.factory.backend(CLIENT, AUTHORITY)
        }
    }

    type Recorded = Arc<Mutex<Vec<AccountsChangeEvent>>>;

    fn record_events(identity: &CachedIdentity) -> (Recorded, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = identity.on_did_accounts_change(move |e| sink.lock().push(e.clone()));
        (seen, sub)
    }

    #[tokio::test]
    async fn test_initialize_reports_existing_accounts_as_added() {
        let h = Harness::new(BrokerConfig::default());
        h.backend().add_account(account("alice"));
        let identity = h.identity();
        let (events, _sub) = record_events(&identity);

        assert_eq!(identity.state(), CacheState::Uninitialized);
        identity.initialize().await.unwrap();

        assert_eq!(identity.state(), CacheState::Ready);
        assert_eq!(identity.accounts().len(), 1);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].added[0].home_account_id, "alice");
    }

    /// Validates that a network result arms a refresh that re-arms itself.
    ///
    /// Assertions:
    /// - one timer is pending after the first acquisition
    /// - the timer fires a forced silent refresh with the redirect URI
    /// - the refreshed result arms the next timer
    #[tokio::test(start_paused = true)]
    async fn test_network_result_arms_refresh_that_rearms() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        backend.add_account(account("alice"));
        let identity = h.identity();
        identity.initialize().await.unwrap();
        let (events, _sub) = record_events(&identity);

        let request = SilentFlowRequest::new(account("alice"), vec!["User.Read".to_string()]);
        identity.acquire_token_silent(request).await.unwrap();
        assert_eq!(identity.pending_refreshes(), 1);
        assert_eq!(events.lock().len(), 1);
        assert_eq!(events.lock()[0].changed[0].home_account_id, "alice");

        // One hour lifetime minus the five minute margin.
        tokio::time::sleep(Duration::from_secs(54 * 60)).await;
        assert_eq!(backend.silent_calls(), 1);

        assert!(wait_for(Duration::from_secs(120), || backend.silent_calls() == 2).await);
        let refresh = backend.silent_requests().pop().unwrap();
        assert!(refresh.force_refresh);
        assert_eq!(refresh.redirect_uri.as_deref(), Some(REDIRECT_URI));
        assert!(wait_for(Duration::from_secs(1), || identity.pending_refreshes() == 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_result_does_not_arm_refresh() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        backend.add_account(account("alice"));
        backend.set_silent_from_cache(true);
        let identity = h.identity();
        identity.initialize().await.unwrap();
        let (events, _sub) = record_events(&identity);

        let result = identity
            .acquire_token_silent(SilentFlowRequest::new(account("alice"), vec!["x".into()]))
            .await
            .unwrap();

        assert!(result.from_cache);
        assert_eq!(identity.pending_refreshes(), 0);
        assert!(events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_refreshes_immediately() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        backend.add_account(account("alice"));
        let identity = h.identity();
        identity.initialize().await.unwrap();

        // Shorter than the refresh margin, so the timer is armed with no delay.
        backend.set_token_lifetime(chrono::Duration::minutes(1));
        identity
            .acquire_token_silent(SilentFlowRequest::new(account("alice"), vec!["x".into()]))
            .await
            .unwrap();
        backend.set_token_lifetime(chrono::Duration::hours(1));

        assert!(wait_for(Duration::from_secs(1), || backend.silent_calls() == 2).await);
        assert!(wait_for(Duration::from_secs(1), || identity.pending_refreshes() == 1).await);
    }

    /// Validates broker `iat` de-duplication.
    ///
    /// Assertions:
    /// - with the policy on, a second broker result with the same `iat` is silent
    /// - with the policy off, every broker network result fires
    #[tokio::test]
    async fn test_broker_iat_dedupe_is_a_policy() {
        for (dedupe, expected) in [(true, 1), (false, 2)] {
            let h = Harness::new(BrokerConfig { enabled: true, dedupe_unchanged_iat: dedupe });
            let backend = h.backend();
            backend.set_broker_available(true);
            backend.add_account(account("alice"));
            let identity = h.identity();
            assert!(identity.is_broker_available());
            identity.initialize().await.unwrap();
            let (events, _sub) = record_events(&identity);

            for _ in 0..2 {
                let request = SilentFlowRequest::new(account("alice"), vec!["x".into()]);
                identity.acquire_token_silent(request).await.unwrap();
            }
            assert_eq!(events.lock().len(), expected, "dedupe = {dedupe}");
            identity.dispose();
        }
    }

    #[tokio::test]
    async fn test_broker_accounts_are_filtered_by_allow_list() {
        let h = Harness::new(BrokerConfig { enabled: true, dedupe_unchanged_iat: true });
        let backend = h.backend();
        backend.set_broker_available(true);
        backend.add_account(account("machine-wide"));
        let identity = h.identity();
        identity.initialize().await.unwrap();
        assert!(identity.accounts().is_empty());

        backend.script_interactive(InteractiveStep::SignIn(account("alice")));
        let request = InteractiveRequest {
            scopes: vec!["User.Read".into()],
            login_hint: None,
            prompt: None,
            redirect: RedirectKind::LocalServer,
        };
        identity.acquire_token_interactive(request, &CancellationToken::new()).await.unwrap();

        let ids: Vec<String> = identity.accounts().into_iter().map(|a| a.home_account_id).collect();
        assert_eq!(ids, vec!["alice".to_string()]);
    }

    /// Validates the remove-last signal.
    ///
    /// Assertions:
    /// - removing the only account fires the signal exactly once
    /// - the removal time is recorded in the memento
    #[tokio::test]
    async fn test_remove_last_account_signals_once() {
        let h = Harness::new(BrokerConfig::default());
        h.backend().add_account(account("alice"));
        let identity = h.identity();
        identity.initialize().await.unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _sub = identity.on_did_remove_last_account(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        identity.remove_account(&account("alice")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        identity.update().await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(identity.is_drained());
        assert!(h.memento.get(&last_removal_key(CLIENT, AUTHORITY)).is_some());
    }

    #[tokio::test]
    async fn test_newer_removal_timestamp_recreates_client() {
        let h = Harness::new(BrokerConfig::default());
        let identity = h.identity();
        identity.initialize().await.unwrap();
        assert_eq!(h.factory.created(), 1);

        let removed_at = h.clock.now() + chrono::Duration::seconds(1);
        h.memento.set(&last_removal_key(CLIENT, AUTHORITY), Value::String(removed_at.to_rfc3339()));
        h.clock.advance(Duration::from_secs(2));

        identity.update().await.unwrap();
        assert_eq!(h.factory.created(), 2);
        identity.update().await.unwrap();
        assert_eq!(h.factory.created(), 2, "client recreated only once per removal");
    }

    #[tokio::test]
    async fn test_external_cache_write_triggers_account_refresh() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        let identity = h.identity();
        identity.initialize().await.unwrap();

        backend.add_account(account("bob"));
        let plugin_key = format!("pca:{}", IdentityKey::new(CLIENT, AUTHORITY).to_storage_key());
        h.storage.set_external(&plugin_key, "[\"bob\"]");

        assert!(wait_for(Duration::from_secs(1), || identity.accounts().len() == 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_timeout_and_cancellation_are_distinct() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        let identity = h.identity();
        identity.initialize().await.unwrap();
        let request = InteractiveRequest {
            scopes: vec!["User.Read".into()],
            login_hint: None,
            prompt: Some("select_account".into()),
            redirect: RedirectKind::LocalServer,
        };

        backend.script_interactive(InteractiveStep::Hang);
        let err = identity
            .acquire_token_interactive(request.clone(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CredCacheError::Timeout(_)));

        backend.script_interactive(InteractiveStep::Hang);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = identity.acquire_token_interactive(request, &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    /// Validates a token from interactive sign-in survives a failed account
    /// refresh.
    ///
    /// Assertions:
    /// - the result is returned even though listing accounts fails
    /// - the next successful refresh reports the new account
    #[tokio::test]
    async fn test_interactive_result_survives_failed_account_refresh() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        let identity = h.identity();
        identity.initialize().await.unwrap();
        backend.script_interactive(InteractiveStep::SignIn(account("alice")));
        backend.set_listing_fails(true);

        let request = InteractiveRequest {
            scopes: vec!["User.Read".into()],
            login_hint: None,
            prompt: None,
            redirect: RedirectKind::LocalServer,
        };
        let result =
            identity.acquire_token_interactive(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.account.home_account_id, "alice");
        assert!(identity.accounts().is_empty());

        backend.set_listing_fails(false);
        identity.update().await.unwrap();
        assert_eq!(identity.accounts()[0].home_account_id, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_refreshes() {
        let h = Harness::new(BrokerConfig::default());
        let backend = h.backend();
        backend.add_account(account("alice"));
        let identity = h.identity();
        identity.initialize().await.unwrap();
        identity
            .acquire_token_silent(SilentFlowRequest::new(account("alice"), vec!["x".into()]))
            .await
            .unwrap();
        assert_eq!(identity.pending_refreshes(), 1);

        identity.dispose();
        assert_eq!(identity.pending_refreshes(), 0);
        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
        assert_eq!(backend.silent_calls(), 1);
    }

    #[test]
    fn test_removal_timestamp_accepts_rfc3339_and_millis() {
        let at = parse_timestamp(&Value::String("2024-05-01T10:00:00Z".into())).unwrap();
        assert_eq!(at.timestamp(), 1_714_557_600);
        let millis = parse_timestamp(&serde_json::json!(1_714_557_600_000_i64)).unwrap();
        assert_eq!(millis, at);
        assert!(parse_timestamp(&Value::Bool(true)).is_none());
    }
}
