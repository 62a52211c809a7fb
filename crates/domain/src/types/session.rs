//! Authentication sessions exposed to consumers

use serde::{Deserialize, Serialize};

use super::account::AccountInfo;
use super::token::AuthenticationResult;
use crate::constants::ACCOUNT_SESSION_PLACEHOLDER_TOKEN;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionAccount {
    pub id: String,
    pub label: String,
}

impl From<&AccountInfo> for SessionAccount {
    fn from(account: &AccountInfo) -> Self {
        Self { id: account.home_account_id.clone(), label: account.username.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationSession {
    pub id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub account: SessionAccount,
    pub scopes: Vec<String>,
}

impl AuthenticationSession {
    /// Session describing a token result for the requested scopes.
    pub fn from_result(result: &AuthenticationResult, scopes: &[String]) -> Self {
        Self {
            id: result.account.home_account_id.clone(),
            access_token: result.access_token.clone(),
            id_token: Some(result.id_token.clone()),
            account: SessionAccount::from(&result.account),
            scopes: scopes.to_vec(),
        }
    }

    /// Session describing only an account, with no usable token.
    pub fn from_account(account: &AccountInfo) -> Self {
        Self {
            id: account.home_account_id.clone(),
            access_token: ACCOUNT_SESSION_PLACEHOLDER_TOKEN.to_string(),
            id_token: account.id_token.clone(),
            account: SessionAccount::from(account),
            scopes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsChangeEvent {
    pub added: Vec<AuthenticationSession>,
    pub changed: Vec<AuthenticationSession>,
    pub removed: Vec<AuthenticationSession>,
}

impl SessionsChangeEvent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSessionsOptions {
    /// Restrict results to this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<SessionAccount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionOptions {
    /// Account to sign in as; used as the login hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<SessionAccount>,
    /// Try a silent acquisition for `account` before prompting.
    #[serde(default)]
    pub silent_first: bool,
}

/// Refresh-token session persisted by the pre-cache implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySession {
    pub scope: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}
