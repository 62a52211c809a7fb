//! Mock port implementations
//!
//! State lives behind `parking_lot` locks so tests can script behaviour and
//! inspect calls while the code under test holds `Arc`s to the same mocks.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credcache_common::{Clock, Emitter, Subscription, SystemClock};
use credcache_domain::{
    AccountInfo, AuthenticationResult, CredCacheError, IdTokenClaims, IdentityKey,
    InteractiveRequest, LegacySession, MicrosoftAccountType, RedirectKind, RefreshTokenRequest,
    Result, SilentFlowRequest,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::ports::{
    ChangeListener, FallbackPrompt, LegacySessionStore, Memento, PublicClientApplication,
    PublicClientConfig, PublicClientFactory, SecretStorage, SecretStorageChange,
    TelemetryReporter,
};
use crate::secret_store::SecretStorageCachePlugin;

/// Account fixture: `username` is `{id}@contoso.com`, tenant `contoso`.
pub fn account(id: &str) -> AccountInfo {
    AccountInfo {
        home_account_id: id.to_string(),
        environment: "login.microsoftonline.com".to_string(),
        tenant_id: "contoso".to_string(),
        username: format!("{id}@contoso.com"),
        local_account_id: format!("local-{id}"),
        name: Some(id.to_string()),
        id_token: Some(format!("id-token-{id}")),
        id_token_claims: Some(IdTokenClaims {
            tid: Some("contoso".to_string()),
            oid: Some(format!("oid-{id}")),
            iat: Some(1_700_000_000),
            preferred_username: Some(format!("{id}@contoso.com")),
            name: Some(id.to_string()),
        }),
    }
}

// ---------------------------------------------------------------------------
// Secret storage
// ---------------------------------------------------------------------------

/// In-memory secret storage. Local writes and `*_external` writes both fire
/// the change feed.
#[derive(Default)]
pub struct MockSecretStorage {
    data: Mutex<HashMap<String, String>>,
    changes: Emitter<SecretStorageChange>,
    failing: AtomicBool,
}

impl MockSecretStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value, bypassing the port.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    /// Simulate a write by another process.
    pub fn set_external(&self, key: &str, value: &str) {
        self.data.lock().insert(key.to_string(), value.to_string());
        self.changes.fire(&SecretStorageChange { key: key.to_string() });
    }

    /// Simulate a delete by another process.
    pub fn remove_external(&self, key: &str) {
        self.data.lock().remove(key);
        self.changes.fire(&SecretStorageChange { key: key.to_string() });
    }

    /// Make every port call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().keys().cloned().collect()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CredCacheError::Storage("secret storage unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStorage for MockSecretStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.raw(key))
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.set_external(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.remove_external(key);
        Ok(())
    }

    fn on_did_change(&self, listener: ChangeListener<SecretStorageChange>) -> Subscription {
        self.changes.subscribe(move |change| listener(change))
    }
}

// ---------------------------------------------------------------------------
// Memento
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockMemento {
    values: Mutex<HashMap<String, Value>>,
}

impl MockMemento {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }
}

#[async_trait]
impl Memento for MockMemento {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        self.set(key, value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity-provider client
// ---------------------------------------------------------------------------

/// One scripted interactive sign-in.
#[derive(Debug, Clone)]
pub enum InteractiveStep {
    SignIn(AccountInfo),
    Fail(CredCacheError),
    /// Never completes; only cancellation or timeout ends the attempt.
    Hang,
}

/// Server-side state for one identity, shared by every client the factory
/// creates for it.
pub struct MockBackend {
    clock: Arc<dyn Clock>,
    accounts: Mutex<Vec<AccountInfo>>,
    failing_accounts: Mutex<HashSet<String>>,
    silent_from_cache: AtomicBool,
    silent_delay: Mutex<Duration>,
    token_lifetime: Mutex<chrono::Duration>,
    broker_available: AtomicBool,
    listing_fails: AtomicBool,
    interactive_script: Mutex<VecDeque<InteractiveStep>>,
    redirects: Mutex<Vec<RedirectKind>>,
    refresh_tokens: Mutex<HashMap<String, AccountInfo>>,
    silent_requests: Mutex<Vec<SilentFlowRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    silent_calls: AtomicUsize,
    interactive_calls: AtomicUsize,
    refresh_token_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    issued: AtomicUsize,
}

impl MockBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            accounts: Mutex::new(Vec::new()),
            failing_accounts: Mutex::new(HashSet::new()),
            silent_from_cache: AtomicBool::new(false),
            silent_delay: Mutex::new(Duration::ZERO),
            token_lifetime: Mutex::new(chrono::Duration::hours(1)),
            broker_available: AtomicBool::new(false),
            listing_fails: AtomicBool::new(false),
            interactive_script: Mutex::new(VecDeque::new()),
            redirects: Mutex::new(Vec::new()),
            refresh_tokens: Mutex::new(HashMap::new()),
            silent_requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            silent_calls: AtomicUsize::new(0),
            interactive_calls: AtomicUsize::new(0),
            refresh_token_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn add_account(&self, account: AccountInfo) {
        let mut accounts = self.accounts.lock();
        if !accounts.iter().any(|a| a.home_account_id == account.home_account_id) {
            accounts.push(account);
        }
    }

    pub fn accounts(&self) -> Vec<AccountInfo> {
        self.accounts.lock().clone()
    }

    pub fn remove(&self, home_account_id: &str) {
        self.accounts.lock().retain(|a| a.home_account_id != home_account_id);
    }

    /// Silent acquisition for this account fails.
    pub fn fail_silent_for(&self, home_account_id: &str) {
        self.failing_accounts.lock().insert(home_account_id.to_string());
    }

    pub fn set_silent_from_cache(&self, from_cache: bool) {
        self.silent_from_cache.store(from_cache, Ordering::SeqCst);
    }

    pub fn set_silent_delay(&self, delay: Duration) {
        *self.silent_delay.lock() = delay;
    }

    pub fn set_token_lifetime(&self, lifetime: chrono::Duration) {
        *self.token_lifetime.lock() = lifetime;
    }

    pub fn set_broker_available(&self, available: bool) {
        self.broker_available.store(available, Ordering::SeqCst);
    }

    /// Account listing fails with a storage error.
    pub fn set_listing_fails(&self, fails: bool) {
        self.listing_fails.store(fails, Ordering::SeqCst);
    }

    pub fn script_interactive(&self, step: InteractiveStep) {
        self.interactive_script.lock().push_back(step);
    }

    pub fn register_refresh_token(&self, refresh_token: &str, account: AccountInfo) {
        self.refresh_tokens.lock().insert(refresh_token.to_string(), account);
    }

    /// Redirect kinds of every interactive attempt, in order.
    pub fn redirects(&self) -> Vec<RedirectKind> {
        self.redirects.lock().clone()
    }

    pub fn silent_requests(&self) -> Vec<SilentFlowRequest> {
        self.silent_requests.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn silent_calls(&self) -> usize {
        self.silent_calls.load(Ordering::SeqCst)
    }

    pub fn interactive_calls(&self) -> usize {
        self.interactive_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_token_calls(&self) -> usize {
        self.refresh_token_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    fn issue(
        &self,
        account: AccountInfo,
        scopes: Vec<String>,
        from_cache: bool,
    ) -> AuthenticationResult {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst);
        let expires_on: DateTime<Utc> = self.clock.now() + *self.token_lifetime.lock();
        AuthenticationResult {
            access_token: format!("at-{}-{serial}", account.home_account_id),
            id_token: account.id_token.clone().unwrap_or_default(),
            unique_id: account.local_account_id.clone(),
            tenant_id: account.tenant_id.clone(),
            account,
            scopes,
            expires_on,
            refresh_on: None,
            from_cache,
            from_native_broker: self.broker_available.load(Ordering::SeqCst),
        }
    }
}

/// Client bound to a [`MockBackend`]; persists the account list through the
/// cache plugin the way a real client persists its token cache.
pub struct MockPublicClient {
    backend: Arc<MockBackend>,
    cache_plugin: Arc<SecretStorageCachePlugin>,
}

impl MockPublicClient {
    pub fn new(backend: Arc<MockBackend>, cache_plugin: Arc<SecretStorageCachePlugin>) -> Self {
        Self { backend, cache_plugin }
    }

    async fn persist(&self) -> Result<()> {
        let ids: Vec<String> =
            self.backend.accounts().into_iter().map(|a| a.home_account_id).collect();
        self.cache_plugin.after_cache_access(&serde_json::to_string(&ids)?, true).await
    }
}

struct InFlight<'a>(&'a MockBackend);

impl<'a> InFlight<'a> {
    fn enter(backend: &'a MockBackend) -> Self {
        let now = backend.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        backend.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(backend)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PublicClientApplication for MockPublicClient {
    async fn acquire_token_silent(
        &self,
        request: &SilentFlowRequest,
    ) -> Result<AuthenticationResult> {
        let backend = &self.backend;
        backend.silent_calls.fetch_add(1, Ordering::SeqCst);
        backend.silent_requests.lock().push(request.clone());
        let _in_flight = InFlight::enter(backend);

        let delay = *backend.silent_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = &request.account.home_account_id;
        if backend.failing_accounts.lock().contains(id) {
            return Err(CredCacheError::Auth(format!("interaction_required for {id}")));
        }
        let Some(account) = backend.accounts().into_iter().find(|a| a.home_account_id == *id)
        else {
            return Err(CredCacheError::Auth(format!("no cached account {id}")));
        };
        let from_cache = !request.force_refresh && backend.silent_from_cache.load(Ordering::SeqCst);
        Ok(backend.issue(account, request.scopes.clone(), from_cache))
    }

    async fn acquire_token_interactive(
        &self,
        request: &InteractiveRequest,
    ) -> Result<AuthenticationResult> {
        let backend = &self.backend;
        backend.interactive_calls.fetch_add(1, Ordering::SeqCst);
        backend.redirects.lock().push(request.redirect);

        let step = backend.interactive_script.lock().pop_front();
        match step {
            Some(InteractiveStep::SignIn(account)) => {
                backend.add_account(account.clone());
                self.persist().await?;
                Ok(backend.issue(account, request.scopes.clone(), false))
            }
            Some(InteractiveStep::Fail(err)) => Err(err),
            Some(InteractiveStep::Hang) => futures::future::pending().await,
            None => Err(CredCacheError::Internal("no interactive step scripted".into())),
        }
    }

    async fn acquire_token_by_refresh_token(
        &self,
        request: &RefreshTokenRequest,
    ) -> Result<AuthenticationResult> {
        let backend = &self.backend;
        backend.refresh_token_calls.fetch_add(1, Ordering::SeqCst);
        let account = backend.refresh_tokens.lock().get(&request.refresh_token).cloned();
        let Some(account) = account else {
            return Err(CredCacheError::Server {
                code: "invalid_grant".into(),
                description: "refresh token not recognised".into(),
            });
        };
        backend.add_account(account.clone());
        self.persist().await?;
        Ok(backend.issue(account, request.scopes.clone(), false))
    }

    async fn get_all_accounts(&self) -> Result<Vec<AccountInfo>> {
        if self.backend.listing_fails.load(Ordering::SeqCst) {
            return Err(CredCacheError::Storage("account listing unavailable".into()));
        }
        Ok(self.backend.accounts())
    }

    async fn remove_account(&self, account: &AccountInfo) -> Result<()> {
        self.backend.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.remove(&account.home_account_id);
        self.persist().await
    }

    fn is_broker_available(&self) -> bool {
        self.backend.broker_available.load(Ordering::SeqCst)
    }
}

/// Factory handing out [`MockPublicClient`]s over per-identity backends.
pub struct MockClientFactory {
    clock: Arc<dyn Clock>,
    backends: Mutex<HashMap<IdentityKey, Arc<MockBackend>>>,
    fail_creation: Mutex<HashSet<IdentityKey>>,
    created: AtomicUsize,
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MockClientFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            backends: Mutex::new(HashMap::new()),
            fail_creation: Mutex::new(HashSet::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Backend for `(client_id, authority)`, created on first use.
    pub fn backend(&self, client_id: &str, authority: &str) -> Arc<MockBackend> {
        let key = IdentityKey::new(client_id, authority);
        Arc::clone(
            self.backends
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(MockBackend::new(Arc::clone(&self.clock)))),
        )
    }

    pub fn fail_creation_for(&self, client_id: &str, authority: &str) {
        self.fail_creation.lock().insert(IdentityKey::new(client_id, authority));
    }

    /// Clients created so far, across all identities.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl PublicClientFactory for MockClientFactory {
    fn create(&self, config: &PublicClientConfig) -> Result<Arc<dyn PublicClientApplication>> {
        if self.fail_creation.lock().contains(&config.key) {
            return Err(CredCacheError::Config(format!("cannot create client for {}", config.key)));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let backend = self.backend(&config.key.client_id, &config.key.authority);
        Ok(Arc::new(MockPublicClient::new(backend, Arc::clone(&config.cache_plugin))))
    }
}

// ---------------------------------------------------------------------------
// Telemetry, prompt, legacy sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    Login(Vec<String>),
    LoginFailed,
    Logout,
    LogoutFailed,
    Account(MicrosoftAccountType),
}

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &TelemetryEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

impl TelemetryReporter for RecordingTelemetry {
    fn send_login_event(&self, scopes: &[String]) {
        self.events.lock().push(TelemetryEvent::Login(scopes.to_vec()));
    }

    fn send_login_failed_event(&self) {
        self.events.lock().push(TelemetryEvent::LoginFailed);
    }

    fn send_logout_event(&self) {
        self.events.lock().push(TelemetryEvent::Logout);
    }

    fn send_logout_failed_event(&self) {
        self.events.lock().push(TelemetryEvent::LogoutFailed);
    }

    fn send_account_event(&self, _scopes: &[String], account_type: MicrosoftAccountType) {
        self.events.lock().push(TelemetryEvent::Account(account_type));
    }
}

/// Fallback prompt with a fixed answer that counts how often it was asked.
pub struct ScriptedPrompt {
    answer: AtomicBool,
    asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(answer: bool) -> Self {
        Self { answer: AtomicBool::new(answer), asked: AtomicUsize::new(0) }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackPrompt for ScriptedPrompt {
    async fn confirm_fallback(&self) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockLegacySessionStore {
    sessions: Mutex<Vec<LegacySession>>,
}

impl MockLegacySessionStore {
    pub fn new(sessions: Vec<LegacySession>) -> Self {
        Self { sessions: Mutex::new(sessions) }
    }
}

#[async_trait]
impl LegacySessionStore for MockLegacySessionStore {
    async fn get_all(&self) -> Result<Vec<LegacySession>> {
        Ok(self.sessions.lock().clone())
    }
}
