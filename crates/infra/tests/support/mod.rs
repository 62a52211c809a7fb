//! Shared helpers for `credcache-infra` integration tests.
//!
//! Builds an [`OAuthPublicClient`] whose authority is a wiremock server and
//! whose token cache lives in in-memory secret storage.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use credcache_common::MockClock;
use credcache_core::testing::MockSecretStorage;
use credcache_core::SecretStorageCachePlugin;
use credcache_domain::{AccountInfo, IdentityKey, Result};
use credcache_infra::{
    BrowserOpener, HttpClient, OAuthClientServices, OAuthPublicClient, UriHandlerLoopback,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use wiremock::MockServer;

pub const CLIENT_ID: &str = "aebc6443-996d-45c2-90f0-388ff96faa56";
pub const TENANT: &str = "contoso";

/// Unsigned JWT carrying the given claims.
pub fn id_token(oid: &str, tid: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none", "typ": "JWT"}).to_string());
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "oid": oid,
            "tid": tid,
            "preferred_username": username,
            "name": username,
            "iat": 1_700_000_000,
        })
        .to_string(),
    );
    format!("{header}.{payload}.")
}

/// Successful token endpoint body for `oid`.
pub fn token_body(oid: &str, access_token: &str, refresh_token: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "refresh_token": refresh_token,
        "id_token": id_token(oid, "tenant-1", &format!("{oid}@contoso.com")),
        "expires_in": 3600,
        "scope": "User.Read openid profile offline_access",
    })
}

pub fn scopes(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

/// Records every URL it is asked to open and runs an optional reaction.
#[derive(Default)]
pub struct RecordingBrowser {
    opened: Mutex<Vec<String>>,
    on_open: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl RecordingBrowser {
    pub fn reacting(on_open: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self { opened: Mutex::new(Vec::new()), on_open: Some(Box::new(on_open)) }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl BrowserOpener for RecordingBrowser {
    fn open(&self, url: &str) -> Result<()> {
        self.opened.lock().push(url.to_string());
        if let Some(on_open) = &self.on_open {
            on_open(url);
        }
        Ok(())
    }
}

/// Query parameter `name` of `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

pub struct ClientHarness {
    pub server: MockServer,
    pub storage: Arc<MockSecretStorage>,
    pub clock: MockClock,
    pub uri_handler: Arc<UriHandlerLoopback>,
    pub plugin: Arc<SecretStorageCachePlugin>,
    pub key: IdentityKey,
}

impl ClientHarness {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let storage = Arc::new(MockSecretStorage::new());
        let key = IdentityKey::new(CLIENT_ID, format!("{}/{TENANT}", server.uri()));
        let plugin = Arc::new(SecretStorageCachePlugin::new(storage.clone(), &key));
        Self {
            server,
            storage,
            clock: MockClock::new(),
            uri_handler: Arc::new(UriHandlerLoopback::new()),
            plugin,
            key,
        }
    }

    pub fn token_path(&self) -> String {
        format!("/{TENANT}/oauth2/v2.0/token")
    }

    pub fn services(&self, browser: Arc<dyn BrowserOpener>) -> OAuthClientServices {
        OAuthClientServices {
            http: HttpClient::builder()
                .base_backoff(Duration::from_millis(5))
                .max_attempts(1)
                .build()
                .expect("http client"),
            browser,
            uri_handler: self.uri_handler.clone(),
            clock: Arc::new(self.clock.clone()),
            refresh_margin: Duration::from_secs(300),
        }
    }

    pub fn client(&self) -> OAuthPublicClient {
        self.client_with_browser(Arc::new(RecordingBrowser::default()))
    }

    pub fn client_with_browser(&self, browser: Arc<dyn BrowserOpener>) -> OAuthPublicClient {
        OAuthPublicClient::new(&self.key, self.plugin.clone(), self.services(browser))
            .expect("client")
    }

    /// The cached token blob, if any was persisted.
    pub fn cache_blob(&self) -> Option<String> {
        self.storage.raw(self.plugin.key())
    }
}

pub fn home_account_id(oid: &str) -> String {
    format!("{oid}.tenant-1")
}

pub fn account_stub(oid: &str) -> AccountInfo {
    AccountInfo {
        home_account_id: home_account_id(oid),
        environment: "127.0.0.1".into(),
        tenant_id: "tenant-1".into(),
        username: format!("{oid}@contoso.com"),
        local_account_id: oid.into(),
        name: None,
        id_token: None,
        id_token_claims: None,
    }
}
