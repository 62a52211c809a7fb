//! Token requests and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountInfo;

/// Result of any token acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub access_token: String,
    pub id_token: String,
    pub account: AccountInfo,
    pub scopes: Vec<String>,
    pub expires_on: DateTime<Utc>,
    /// Provider hint for when the token should be refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_on: Option<DateTime<Utc>>,
    /// `true` when no network round-trip happened.
    pub from_cache: bool,
    #[serde(default)]
    pub from_native_broker: bool,
    pub unique_id: String,
    pub tenant_id: String,
}

impl AuthenticationResult {
    /// Time the background refresh is aimed at, before any margin.
    #[must_use]
    pub fn refresh_target(&self) -> DateTime<Utc> {
        self.refresh_on.unwrap_or(self.expires_on)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilentFlowRequest {
    pub account: AccountInfo,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
}

impl SilentFlowRequest {
    pub fn new(account: AccountInfo, scopes: Vec<String>) -> Self {
        Self { account, scopes, redirect_uri: None, force_refresh: false }
    }
}

/// How the authorization code is handed back during interactive sign-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectKind {
    /// A loopback HTTP server on 127.0.0.1 receives the redirect.
    #[default]
    LocalServer,
    /// The host receives the redirect URI and forwards it.
    UriHandler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveRequest {
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
    /// OAuth `prompt` parameter, e.g. `select_account`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub redirect: RedirectKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub force_cache: bool,
}
