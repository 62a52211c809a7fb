//! Microsoft authentication provider
//!
//! The outward surface of the cache. A "session" here is an account: the
//! provider hands out one session per signed-in account and mints tokens
//! for whatever scopes are asked for on demand.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use credcache_common::{Clock, Emitter, EventBufferer, Subscription, SubscriptionSet};
use credcache_domain::constants::{MIGRATION_MEMENTO_KEY, REDIRECT_URI};
use credcache_domain::{
    AccountInfo, AccountsChangeEvent, AuthenticationResult, AuthenticationSession,
    CloudEnvironment, CreateSessionOptions, CredCacheConfig, CredCacheError, GetSessionsOptions,
    InteractiveRequest, MicrosoftAccountType, RedirectKind, Result, ScopeData,
    SessionsChangeEvent, SilentFlowRequest,
};
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::identity::{CachedIdentity, IdentityServices};
use crate::manager::IdentityCacheManager;
use crate::ports::{
    FallbackPrompt, LegacySessionStore, Memento, PublicClientFactory, SecretStorage,
    TelemetryReporter,
};
use crate::sign_in::{SignInStage, StageOutcome};

/// Host collaborators the provider runs against.
#[derive(Clone)]
pub struct ProviderPorts {
    pub storage: Arc<dyn SecretStorage>,
    pub memento: Arc<dyn Memento>,
    pub factory: Arc<dyn PublicClientFactory>,
    pub telemetry: Arc<dyn TelemetryReporter>,
    pub prompt: Arc<dyn FallbackPrompt>,
    /// Source for the one-time migration of pre-cache sessions.
    pub legacy_sessions: Option<Arc<dyn LegacySessionStore>>,
    pub clock: Arc<dyn Clock>,
}

pub struct MicrosoftAuthProvider {
    cloud: CloudEnvironment,
    manager: Arc<IdentityCacheManager>,
    memento: Arc<dyn Memento>,
    telemetry: Arc<dyn TelemetryReporter>,
    prompt: Arc<dyn FallbackPrompt>,
    legacy_sessions: Option<Arc<dyn LegacySessionStore>>,
    bufferer: EventBufferer<AccountsChangeEvent>,
    sessions_changed: Emitter<SessionsChangeEvent>,
    subscriptions: SubscriptionSet,
}

impl MicrosoftAuthProvider {
    pub fn new(config: &CredCacheConfig, ports: ProviderPorts) -> Self {
        let services = IdentityServices {
            storage: ports.storage,
            memento: Arc::clone(&ports.memento),
            factory: ports.factory,
            clock: ports.clock,
            cloud_name: config.cloud.name().to_string(),
            refresh_margin: config.refresh.margin(),
            interactive_timeout: config.interactive.timeout(),
            broker: config.broker.clone(),
        };
        let manager = IdentityCacheManager::new(services);

        let bufferer = EventBufferer::new(AccountsChangeEvent::merge);
        let sessions_changed = Emitter::new();
        let subscriptions = SubscriptionSet::new();
        subscriptions.add(bufferer.attach(manager.accounts_change_emitter()));
        let sink = sessions_changed.clone();
        subscriptions.add(bufferer.subscribe(move |event: &AccountsChangeEvent| {
            debug!(
                added = event.added.len(),
                changed = event.changed.len(),
                deleted = event.deleted.len(),
                "accounts changed"
            );
            sink.fire(&sessions_event(event));
        }));

        Self {
            cloud: config.cloud,
            manager,
            memento: ports.memento,
            telemetry: ports.telemetry,
            prompt: ports.prompt,
            legacy_sessions: ports.legacy_sessions,
            bufferer,
            sessions_changed,
            subscriptions,
        }
    }

    /// Restore persisted identities, migrate legacy sessions once, and
    /// report the signed-in account types.
    pub async fn initialize(&self) -> Result<()> {
        self.bufferer.buffer_events_async(self.manager.initialize()).await?;

        let migrated = self
            .memento
            .get(MIGRATION_MEMENTO_KEY)
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        if !migrated {
            if let Err(err) = self.migrate_legacy_sessions().await {
                error!(error = %err, "legacy session migration failed");
            }
        }

        for identity in self.manager.get_all() {
            for account in identity.accounts() {
                if let Some(tid) = account.tid() {
                    self.telemetry.send_account_event(&[], MicrosoftAccountType::from_tid(tid));
                }
            }
        }
        Ok(())
    }

    /// Sessions for `scopes`, or one account-only session per signed-in
    /// account when `scopes` is `None`.
    ///
    /// Accounts that cannot produce a token silently are skipped.
    pub async fn get_sessions(
        &self,
        scopes: Option<&[String]>,
        options: &GetSessionsOptions,
    ) -> Result<Vec<AuthenticationSession>> {
        let Some(scopes) = scopes else {
            info!("get_sessions [all] starting");
            let mut seen = HashSet::new();
            let sessions: Vec<AuthenticationSession> = self
                .manager
                .get_all()
                .iter()
                .flat_map(|identity| identity.accounts())
                .filter(|account| seen.insert(account.home_account_id.clone()))
                .map(|account| AuthenticationSession::from_account(&account))
                .collect();
            info!(count = sessions.len(), "get_sessions [all] returned");
            return Ok(sessions);
        };

        let scope_data = ScopeData::new(scopes);
        info!(scopes = %scope_data.scope_str, "get_sessions starting");
        let identity = self.identity_for(&scope_data.client_id, &scope_data.tenant, &[]).await?;

        let accounts: Vec<AccountInfo> = identity
            .accounts()
            .into_iter()
            .filter(|account| {
                options.account.as_ref().map_or(true, |wanted| wanted.id == account.home_account_id)
            })
            .collect();

        let sessions = self
            .bufferer
            .buffer_events_async(self.silent_sessions(&identity, &scope_data, accounts))
            .await;
        info!(scopes = %scope_data.scope_str, count = sessions.len(), "get_sessions returned");
        Ok(sessions)
    }

    async fn silent_sessions(
        &self,
        identity: &CachedIdentity,
        scope_data: &ScopeData,
        accounts: Vec<AccountInfo>,
    ) -> Vec<AuthenticationSession> {
        let mut sessions = Vec::with_capacity(accounts.len());
        for account in accounts {
            let account_id = account.home_account_id.clone();
            let request = SilentFlowRequest {
                account,
                scopes: scope_data.scopes_to_send.clone(),
                redirect_uri: Some(REDIRECT_URI.to_string()),
                force_refresh: false,
            };
            match identity.acquire_token_silent(request).await {
                Ok(result) => {
                    sessions.push(AuthenticationSession::from_result(
                        &result,
                        &scope_data.original_scopes,
                    ));
                }
                Err(err) => warn!(
                    scopes = %scope_data.scope_str,
                    account = %account_id,
                    error = %err,
                    "skipping account that failed silent acquisition"
                ),
            }
        }
        sessions
    }

    /// Sign in and return the new session.
    ///
    /// `cancel` bounds the primary interactive attempt. If that attempt is
    /// cancelled the user is offered the alternate flow once.
    pub async fn create_session(
        &self,
        scopes: &[String],
        options: &CreateSessionOptions,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationSession> {
        let scope_data = ScopeData::new(scopes);
        info!(scopes = %scope_data.scope_str, "create_session starting");

        let identity = match self.identity_for(&scope_data.client_id, &scope_data.tenant, &[]).await
        {
            Ok(identity) => identity,
            Err(err) => {
                self.telemetry.send_login_failed_event();
                return Err(err);
            }
        };

        let result = match self.run_sign_in(&identity, &scope_data, options, cancel).await {
            Ok(result) => result,
            Err(err) => {
                self.telemetry.send_login_failed_event();
                warn!(scopes = %scope_data.scope_str, error = %err, "create_session failed");
                return Err(err);
            }
        };

        let session = AuthenticationSession::from_result(&result, &scope_data.original_scopes);
        self.telemetry.send_login_event(&session.scopes);
        info!(scopes = %scope_data.scope_str, "create_session returned session");

        // Consumers waiting on a matching session only react to `added`, so
        // announce it even if the account was already known.
        self.sessions_changed.fire(&SessionsChangeEvent {
            added: vec![session.clone()],
            changed: Vec::new(),
            removed: Vec::new(),
        });
        Ok(session)
    }

    async fn run_sign_in(
        &self,
        identity: &CachedIdentity,
        scope_data: &ScopeData,
        options: &CreateSessionOptions,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult> {
        let login_hint = options.account.as_ref().map(|account| account.label.clone());
        let prompt = if login_hint.is_some() { None } else { Some("select_account".to_string()) };
        let interactive = |redirect| InteractiveRequest {
            scopes: scope_data.scopes_to_send.clone(),
            login_hint: login_hint.clone(),
            prompt: prompt.clone(),
            redirect,
        };

        let mut stage = SignInStage::initial(options.silent_first, options.account.is_some());
        let mut fallback_cancel = cancel.clone();
        let mut last_error: Option<CredCacheError> = None;

        while !stage.is_terminal() {
            debug!(scopes = %scope_data.scope_str, %stage, "sign-in stage");
            let attempt = match stage {
                SignInStage::SilentAttempt => {
                    self.silent_attempt(identity, scope_data, options).await
                }
                SignInStage::BrokerInteractive => {
                    let request = interactive(RedirectKind::LocalServer);
                    identity.acquire_token_interactive(request, cancel).await
                }
                SignInStage::LoopbackFallback => {
                    let request = interactive(RedirectKind::UriHandler);
                    identity.acquire_token_interactive(request, &fallback_cancel).await
                }
                SignInStage::Succeeded | SignInStage::Failed => break,
            };

            match attempt {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let cancelled =
                        err.is_cancellation() && stage == SignInStage::BrokerInteractive;
                    let outcome = if cancelled {
                        let fallback_accepted = self.prompt.confirm_fallback().await;
                        if fallback_accepted && cancel.is_cancelled() {
                            fallback_cancel = CancellationToken::new();
                        }
                        StageOutcome::Cancelled { fallback_accepted }
                    } else {
                        StageOutcome::from_error(&err)
                    };
                    let next = stage.next(outcome);
                    warn!(
                        scopes = %scope_data.scope_str,
                        %stage,
                        %next,
                        error = %err,
                        "sign-in stage failed"
                    );
                    stage = next;
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CredCacheError::Internal("sign-in produced no result".into())))
    }

    async fn silent_attempt(
        &self,
        identity: &CachedIdentity,
        scope_data: &ScopeData,
        options: &CreateSessionOptions,
    ) -> Result<AuthenticationResult> {
        let wanted = options
            .account
            .as_ref()
            .ok_or_else(|| CredCacheError::InvalidInput("silent sign-in needs an account".into()))?;
        let account = identity
            .accounts()
            .into_iter()
            .find(|account| account.home_account_id == wanted.id)
            .ok_or_else(|| CredCacheError::NotFound(format!("account {}", wanted.id)))?;
        identity
            .acquire_token_silent(SilentFlowRequest {
                account,
                scopes: scope_data.scopes_to_send.clone(),
                redirect_uri: Some(REDIRECT_URI.to_string()),
                force_refresh: false,
            })
            .await
    }

    /// Sign the account `session_id` out of every identity holding it.
    ///
    /// Failures are logged and reported to telemetry, never returned.
    pub async fn remove_session(&self, session_id: &str) {
        info!(session = %session_id, "remove_session starting");
        let mut removals = Vec::new();
        for identity in self.manager.get_all() {
            for account in identity.accounts() {
                if account.home_account_id == session_id {
                    self.telemetry.send_logout_event();
                    info!(
                        session = %session_id,
                        client_id = %identity.client_id(),
                        authority = %identity.authority(),
                        "removing session"
                    );
                    let identity = Arc::clone(&identity);
                    removals.push(async move { identity.remove_account(&account).await });
                }
            }
        }

        if removals.is_empty() {
            info!(session = %session_id, "session not found");
            return;
        }

        let attempted = removals.len();
        for result in join_all(removals).await {
            if let Err(err) = result {
                self.telemetry.send_logout_failed_event();
                error!(session = %session_id, error = %err, "error removing session");
            }
        }
        info!(session = %session_id, attempted, "remove_session finished");
    }

    pub fn on_did_change_sessions<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionsChangeEvent) + Send + Sync + 'static,
    {
        self.sessions_changed.subscribe(listener)
    }

    pub fn manager(&self) -> &Arc<IdentityCacheManager> {
        &self.manager
    }

    pub fn dispose(&self) {
        self.subscriptions.dispose_all();
        self.manager.dispose();
    }

    async fn identity_for(
        &self,
        client_id: &str,
        tenant: &str,
        refresh_tokens: &[String],
    ) -> Result<Arc<CachedIdentity>> {
        let authority = authority_url(self.cloud, tenant)?;
        self.manager.get_or_create_with_migration(client_id, &authority, refresh_tokens).await
    }

    /// Move refresh tokens stored by the pre-cache implementation into the
    /// identity caches, grouped by client id and tenant.
    async fn migrate_legacy_sessions(&self) -> Result<()> {
        let sessions = match &self.legacy_sessions {
            Some(store) => store.get_all().await?,
            None => Vec::new(),
        };
        self.memento.update(MIGRATION_MEMENTO_KEY, Value::Bool(true)).await?;

        let endpoint = self.cloud.active_directory_endpoint_url();
        let default_endpoint = CloudEnvironment::AzureCloud.active_directory_endpoint_url();
        let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for session in sessions {
            if session.endpoint.as_deref().unwrap_or(default_endpoint) != endpoint {
                continue;
            }
            let scopes: Vec<&str> = session.scope.split(' ').collect();
            let scope_data = ScopeData::new(&scopes);
            groups
                .entry((scope_data.client_id, scope_data.tenant))
                .or_default()
                .push(session.refresh_token);
        }

        debug!(identities = groups.len(), "migrating legacy sessions");
        for ((client_id, tenant), refresh_tokens) in groups {
            if let Err(err) = self.identity_for(&client_id, &tenant, &refresh_tokens).await {
                error!(%client_id, %tenant, error = %err, "failed to migrate legacy sessions");
            }
        }
        Ok(())
    }
}

/// Authority URL for `tenant` in `cloud`, e.g.
/// `https://login.microsoftonline.com/organizations`.
pub fn authority_url(cloud: CloudEnvironment, tenant: &str) -> Result<String> {
    let base = Url::parse(cloud.active_directory_endpoint_url())
        .map_err(|e| CredCacheError::Config(format!("invalid authority endpoint: {e}")))?;
    base.join(tenant)
        .map(String::from)
        .map_err(|e| CredCacheError::InvalidInput(format!("invalid tenant {tenant}: {e}")))
}

fn sessions_event(event: &AccountsChangeEvent) -> SessionsChangeEvent {
    let convert = |accounts: &[AccountInfo]| {
        accounts.iter().map(AuthenticationSession::from_account).collect::<Vec<_>>()
    };
    SessionsChangeEvent {
        added: convert(&event.added),
        changed: convert(&event.changed),
        removed: convert(&event.deleted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::account;

    #[test]
    fn test_authority_joins_tenant_onto_cloud_endpoint() {
        assert_eq!(
            authority_url(CloudEnvironment::AzureCloud, "organizations").unwrap(),
            "https://login.microsoftonline.com/organizations"
        );
        assert_eq!(
            authority_url(CloudEnvironment::AzureChinaCloud, "contoso").unwrap(),
            "https://login.chinacloudapi.cn/contoso"
        );
    }

    #[test]
    fn test_accounts_event_maps_to_session_event() {
        let event = AccountsChangeEvent {
            added: vec![account("a")],
            changed: vec![account("b")],
            deleted: vec![account("c")],
        };
        let sessions = sessions_event(&event);
        assert_eq!(sessions.added[0].id, "a");
        assert_eq!(sessions.changed[0].id, "b");
        assert_eq!(sessions.removed[0].id, "c");
        assert!(sessions.removed[0].scopes.is_empty());
    }
}
