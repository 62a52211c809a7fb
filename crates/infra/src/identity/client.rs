//! OAuth 2.0 public client for the Microsoft identity platform

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credcache_common::Clock;
use credcache_core::{PublicClientApplication, SecretStorageCachePlugin};
use credcache_domain::constants::REDIRECT_URI;
use credcache_domain::{
    AccountInfo, AuthenticationResult, CredCacheError, IdentityKey, InteractiveRequest,
    RedirectKind, RefreshTokenRequest, Result, SilentFlowRequest,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::claims::account_from_id_token;
use super::loopback::LoopbackServer;
use super::pkce::PkceChallenge;
use super::redirect::UriHandlerLoopback;
use super::token_cache::{normalize_scopes, CachedAccessToken, TokenCache};
use crate::browser::BrowserOpener;
use crate::http::{GrantReply, HttpClient};

/// Scopes requested on every grant so an `id_token` and a refresh token
/// come back.
const GRANT_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Error codes meaning the user has to sign in again.
const INTERACTION_REQUIRED: [&str; 4] =
    ["invalid_grant", "interaction_required", "login_required", "consent_required"];

/// Collaborators shared by every client a factory creates.
#[derive(Clone)]
pub struct OAuthClientServices {
    pub http: HttpClient,
    pub browser: Arc<dyn BrowserOpener>,
    pub uri_handler: Arc<UriHandlerLoopback>,
    pub clock: Arc<dyn Clock>,
    /// Cached access tokens this close to expiry are refreshed instead.
    pub refresh_margin: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    refresh_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn map_oauth_error(body: OAuthErrorBody) -> CredCacheError {
    let description = body.error_description.unwrap_or_default();
    if INTERACTION_REQUIRED.contains(&body.error.as_str()) {
        CredCacheError::Auth(format!("{}: {description}", body.error))
    } else {
        CredCacheError::Server { code: body.error, description }
    }
}

/// Authorization-code (PKCE) and refresh-token grants against one
/// `(client_id, authority)` pair. The token cache lives in secret storage
/// behind the client's cache plugin.
pub struct OAuthPublicClient {
    client_id: String,
    authority: String,
    authorize_endpoint: String,
    token_endpoint: String,
    environment: String,
    services: OAuthClientServices,
    cache_plugin: Arc<SecretStorageCachePlugin>,
    cache_lock: tokio::sync::Mutex<()>,
}

impl OAuthPublicClient {
    pub fn new(
        key: &IdentityKey,
        cache_plugin: Arc<SecretStorageCachePlugin>,
        services: OAuthClientServices,
    ) -> Result<Self> {
        let authority = Url::parse(&key.authority).map_err(|err| {
            CredCacheError::Config(format!("invalid authority {}: {err}", key.authority))
        })?;
        let environment = authority
            .host_str()
            .ok_or_else(|| CredCacheError::Config("authority URL missing host".into()))?
            .to_string();
        let base = key.authority.trim_end_matches('/');

        Ok(Self {
            client_id: key.client_id.clone(),
            authority: key.authority.clone(),
            authorize_endpoint: format!("{base}/oauth2/v2.0/authorize"),
            token_endpoint: format!("{base}/oauth2/v2.0/token"),
            environment,
            services,
            cache_plugin,
            cache_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Authorization URL for one interactive attempt.
    pub fn authorize_url(
        &self,
        request: &InteractiveRequest,
        pkce: &PkceChallenge,
        redirect_uri: &str,
    ) -> String {
        let scope = grant_scope(&request.scopes);
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("response_mode", "query"),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
            ("state", pkce.state.as_str()),
            ("code_challenge", pkce.code_challenge.as_str()),
            ("code_challenge_method", pkce.challenge_method()),
        ];
        if let Some(prompt) = request.prompt.as_deref() {
            params.push(("prompt", prompt));
        }
        if let Some(login_hint) = request.login_hint.as_deref() {
            params.push(("login_hint", login_hint));
        }

        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.authorize_endpoint)
    }

    async fn load_cache(&self) -> Result<TokenCache> {
        let blob = self.cache_plugin.before_cache_access().await?;
        Ok(TokenCache::parse(blob.as_deref()))
    }

    async fn save_cache(&self, cache: &mut TokenCache) -> Result<()> {
        cache.prune_expired(self.services.clock.now());
        self.cache_plugin.after_cache_access(&cache.to_blob()?, true).await
    }

    /// POST a grant to the token endpoint.
    async fn redeem(&self, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let GrantReply { status, body } = self
            .services
            .http
            .post_grant(&self.client_id, &self.authority, &self.token_endpoint, grant)
            .await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|err| {
                CredCacheError::Serialization(format!("invalid token response: {err}"))
            });
        }
        match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(error) => {
                debug!(status = %status, code = %error.error, "token endpoint rejected grant");
                Err(map_oauth_error(error))
            }
            Err(_) => {
                Err(CredCacheError::Network(format!("token endpoint returned HTTP {status}")))
            }
        }
    }

    /// Fold a token response into the cache and build the result.
    fn complete(
        &self,
        cache: &mut TokenCache,
        response: TokenResponse,
        requested: &[String],
        known_account: Option<&AccountInfo>,
    ) -> Result<AuthenticationResult> {
        let account = match (&response.id_token, known_account) {
            (Some(id_token), _) => account_from_id_token(id_token, &self.environment)?,
            (None, Some(account)) => account.clone(),
            (None, None) => {
                return Err(CredCacheError::Auth("token response carried no id_token".into()))
            }
        };

        let now = self.services.clock.now();
        let expires_on = now + chrono::Duration::seconds(response.expires_in);
        let refresh_on = response.refresh_in.map(|secs| now + chrono::Duration::seconds(secs));

        let mut granted: BTreeSet<String> = normalize_scopes(requested);
        if let Some(scope) = &response.scope {
            granted.extend(scope.split_whitespace().map(str::to_ascii_lowercase));
        }

        cache.record(
            account.clone(),
            response.refresh_token,
            CachedAccessToken {
                home_account_id: account.home_account_id.clone(),
                scopes: granted.into_iter().collect(),
                secret: response.access_token.clone(),
                expires_on,
                refresh_on,
            },
        );

        Ok(build_result(account, response.access_token, requested, expires_on, refresh_on, false))
    }
}

fn grant_scope(requested: &[String]) -> String {
    let mut seen = BTreeSet::new();
    requested
        .iter()
        .map(String::as_str)
        .chain(GRANT_SCOPES)
        .filter(|scope| seen.insert(scope.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_result(
    account: AccountInfo,
    access_token: String,
    scopes: &[String],
    expires_on: DateTime<Utc>,
    refresh_on: Option<DateTime<Utc>>,
    from_cache: bool,
) -> AuthenticationResult {
    AuthenticationResult {
        access_token,
        id_token: account.id_token.clone().unwrap_or_default(),
        unique_id: account.local_account_id.clone(),
        tenant_id: account.tenant_id.clone(),
        account,
        scopes: scopes.to_vec(),
        expires_on,
        refresh_on,
        from_cache,
        from_native_broker: false,
    }
}

#[async_trait]
impl PublicClientApplication for OAuthPublicClient {
    async fn acquire_token_silent(
        &self,
        request: &SilentFlowRequest,
    ) -> Result<AuthenticationResult> {
        let _guard = self.cache_lock.lock().await;
        let mut cache = self.load_cache().await?;
        let home_account_id = request.account.home_account_id.as_str();
        let Some(account) = cache.accounts.get(home_account_id).cloned() else {
            return Err(CredCacheError::Auth("account is not in the token cache".into()));
        };

        if !request.force_refresh {
            let margin = chrono::Duration::from_std(self.services.refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let valid_at = self.services.clock.now() + margin;
            let cached = cache.find_access_token(home_account_id, &request.scopes, valid_at);
            if let Some(token) = cached {
                debug!(client_id = %self.client_id, "serving access token from cache");
                return Ok(build_result(
                    account,
                    token.secret.clone(),
                    &request.scopes,
                    token.expires_on,
                    token.refresh_on,
                    true,
                ));
            }
        }

        let refresh_token = cache.refresh_tokens.get(home_account_id).cloned().ok_or_else(|| {
            CredCacheError::Auth("no refresh token cached for account".into())
        })?;
        let scope = grant_scope(&request.scopes);
        let response = self
            .redeem(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("scope", scope.as_str()),
            ])
            .await?;

        let result = self.complete(&mut cache, response, &request.scopes, Some(&account))?;
        self.save_cache(&mut cache).await?;
        debug!(client_id = %self.client_id, "access token refreshed");
        Ok(result)
    }

    async fn acquire_token_interactive(
        &self,
        request: &InteractiveRequest,
    ) -> Result<AuthenticationResult> {
        let pkce = PkceChallenge::generate();

        let (code, redirect_uri) = match request.redirect {
            RedirectKind::LocalServer => {
                let mut server = LoopbackServer::start(pkce.state.clone()).await?;
                let redirect_uri = server.redirect_uri();
                self.services.browser.open(&self.authorize_url(request, &pkce, &redirect_uri))?;
                let code = server.wait_for_code().await;
                if let Err(err) = server.shutdown().await {
                    warn!(error = %err, "loopback server did not shut down cleanly");
                }
                (code?, redirect_uri)
            }
            RedirectKind::UriHandler => {
                let mut pending = self.services.uri_handler.register(&pkce.state);
                let redirect_uri = REDIRECT_URI.to_string();
                self.services.browser.open(&self.authorize_url(request, &pkce, &redirect_uri))?;
                (pending.wait().await?, redirect_uri)
            }
        };

        let scope = grant_scope(&request.scopes);
        let response = self
            .redeem(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("code_verifier", pkce.code_verifier.as_str()),
                ("scope", scope.as_str()),
            ])
            .await?;

        let _guard = self.cache_lock.lock().await;
        let mut cache = self.load_cache().await?;
        let result = self.complete(&mut cache, response, &request.scopes, None)?;
        self.save_cache(&mut cache).await?;
        info!(client_id = %self.client_id, "interactive sign-in completed");
        Ok(result)
    }

    async fn acquire_token_by_refresh_token(
        &self,
        request: &RefreshTokenRequest,
    ) -> Result<AuthenticationResult> {
        let scope = grant_scope(&request.scopes);
        let response = self
            .redeem(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", request.refresh_token.as_str()),
                ("scope", scope.as_str()),
            ])
            .await?;

        let _guard = self.cache_lock.lock().await;
        let mut cache = self.load_cache().await?;
        let result = self.complete(&mut cache, response, &request.scopes, None)?;
        self.save_cache(&mut cache).await?;
        Ok(result)
    }

    async fn get_all_accounts(&self) -> Result<Vec<AccountInfo>> {
        let _guard = self.cache_lock.lock().await;
        Ok(self.load_cache().await?.accounts.into_values().collect())
    }

    async fn remove_account(&self, account: &AccountInfo) -> Result<()> {
        let _guard = self.cache_lock.lock().await;
        let mut cache = self.load_cache().await?;
        if cache.remove_account(&account.home_account_id) {
            self.save_cache(&mut cache).await?;
        }
        Ok(())
    }

    fn is_broker_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_scope_appends_oidc_scopes_once() {
        let requested = vec!["User.Read".to_string(), "OPENID".to_string()];
        assert_eq!(grant_scope(&requested), "User.Read OPENID profile offline_access");
        assert_eq!(grant_scope(&[]), "openid profile offline_access");
    }

    #[test]
    fn oauth_errors_split_into_auth_and_server() {
        let expired = map_oauth_error(OAuthErrorBody {
            error: "invalid_grant".into(),
            error_description: Some("AADSTS70008: expired".into()),
        });
        assert!(matches!(expired, CredCacheError::Auth(msg) if msg.contains("AADSTS70008")));

        let server = map_oauth_error(OAuthErrorBody {
            error: "temporarily_unavailable".into(),
            error_description: None,
        });
        assert!(server.is_server_error());
    }
}
