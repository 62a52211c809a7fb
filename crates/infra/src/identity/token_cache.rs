//! Serialized token cache of one client
//!
//! The whole cache is one JSON blob handed to the
//! [`SecretStorageCachePlugin`](credcache_core::SecretStorageCachePlugin).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use credcache_domain::{AccountInfo, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An access token and the scopes it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccessToken {
    pub home_account_id: String,
    /// Lowercased, sorted.
    pub scopes: Vec<String>,
    pub secret: String,
    pub expires_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_on: Option<DateTime<Utc>>,
}

impl CachedAccessToken {
    fn covers(&self, requested: &BTreeSet<String>) -> bool {
        requested.iter().all(|scope| self.scopes.binary_search(scope).is_ok())
    }

    fn overlaps(&self, other: &[String]) -> bool {
        other.iter().any(|scope| self.scopes.binary_search(scope).is_ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountInfo>,
    /// Keyed by home account id.
    #[serde(default)]
    pub refresh_tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub access_tokens: Vec<CachedAccessToken>,
}

/// Case-insensitive scope set used for matching.
pub fn normalize_scopes<'a, I>(scopes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    scopes.into_iter().map(|scope| scope.trim().to_ascii_lowercase()).collect()
}

impl TokenCache {
    /// Parse a persisted blob. A corrupt blob is discarded: the next sign-in
    /// rebuilds the cache.
    pub fn parse(blob: Option<&str>) -> Self {
        match blob {
            None => Self::default(),
            Some(blob) => serde_json::from_str(blob).unwrap_or_else(|err| {
                warn!(error = %err, "token cache blob corrupt; starting empty");
                Self::default()
            }),
        }
    }

    pub fn to_blob(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Access token for `home_account_id` covering every requested scope and
    /// still valid at `valid_at`.
    pub fn find_access_token(
        &self,
        home_account_id: &str,
        scopes: &[String],
        valid_at: DateTime<Utc>,
    ) -> Option<&CachedAccessToken> {
        let requested = normalize_scopes(scopes);
        self.access_tokens.iter().find(|token| {
            token.home_account_id == home_account_id
                && token.expires_on > valid_at
                && token.covers(&requested)
        })
    }

    /// Record a token response. Older access tokens of the same account that
    /// share a scope with the new one are superseded.
    pub fn record(
        &mut self,
        account: AccountInfo,
        refresh_token: Option<String>,
        access_token: CachedAccessToken,
    ) {
        let home_account_id = account.home_account_id.clone();
        self.access_tokens.retain(|existing| {
            existing.home_account_id != home_account_id || !existing.overlaps(&access_token.scopes)
        });
        self.access_tokens.push(access_token);
        if let Some(refresh_token) = refresh_token {
            self.refresh_tokens.insert(home_account_id.clone(), refresh_token);
        }
        self.accounts.insert(home_account_id, account);
    }

    /// Forget an account and every token issued to it.
    pub fn remove_account(&mut self, home_account_id: &str) -> bool {
        let removed = self.accounts.remove(home_account_id).is_some();
        let had_refresh = self.refresh_tokens.remove(home_account_id).is_some();
        let before = self.access_tokens.len();
        self.access_tokens.retain(|token| token.home_account_id != home_account_id);
        removed || had_refresh || before != self.access_tokens.len()
    }

    /// Drop access tokens that expired before `now`.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.access_tokens.len();
        self.access_tokens.retain(|token| token.expires_on > now);
        before != self.access_tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn account(id: &str) -> AccountInfo {
        AccountInfo {
            home_account_id: id.to_string(),
            environment: "login.microsoftonline.com".to_string(),
            tenant_id: "tid".to_string(),
            username: format!("{id}@contoso.com"),
            local_account_id: id.to_string(),
            name: None,
            id_token: None,
            id_token_claims: None,
        }
    }

    fn access(id: &str, scopes: &[&str], expires_on: DateTime<Utc>) -> CachedAccessToken {
        let scopes: Vec<String> = scopes.iter().map(|s| (*s).to_string()).collect();
        CachedAccessToken {
            home_account_id: id.to_string(),
            scopes: normalize_scopes(&scopes).into_iter().collect(),
            secret: format!("at-{id}"),
            expires_on,
            refresh_on: None,
        }
    }

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn lookup_matches_subset_case_insensitively_and_respects_expiry() {
        let now = Utc::now();
        let mut cache = TokenCache::default();
        cache.record(
            account("a"),
            Some("rt".into()),
            access("a", &["user.read", "mail.read"], now + Duration::hours(1)),
        );

        assert!(cache.find_access_token("a", &scopes(&["User.Read"]), now).is_some());
        assert!(cache.find_access_token("a", &scopes(&["Files.Read"]), now).is_none());
        assert!(cache.find_access_token("b", &scopes(&["User.Read"]), now).is_none());
        let later = now + Duration::hours(2);
        assert!(cache.find_access_token("a", &scopes(&["User.Read"]), later).is_none());
    }

    /// Validates how a new response replaces older state.
    ///
    /// Assertions:
    /// - overlapping access tokens of the same account are superseded
    /// - disjoint ones and other accounts' tokens are kept
    /// - a response without a refresh token keeps the previous one
    #[test]
    fn record_supersedes_overlapping_tokens() {
        let expiry = Utc::now() + Duration::hours(1);
        let mut cache = TokenCache::default();
        cache.record(account("a"), Some("rt-1".into()), access("a", &["user.read"], expiry));
        cache.record(account("a"), None, access("a", &["files.read"], expiry));
        cache.record(account("b"), Some("rt-b".into()), access("b", &["user.read"], expiry));
        cache.record(account("a"), None, access("a", &["user.read", "mail.read"], expiry));

        assert_eq!(cache.access_tokens.len(), 3);
        assert_eq!(cache.refresh_tokens.get("a").map(String::as_str), Some("rt-1"));
        assert_eq!(cache.accounts.len(), 2);
    }

    #[test]
    fn remove_account_and_corrupt_blob() {
        let expiry = Utc::now() + Duration::hours(1);
        let mut cache = TokenCache::default();
        cache.record(account("a"), Some("rt".into()), access("a", &["user.read"], expiry));

        let restored = TokenCache::parse(Some(&cache.to_blob().unwrap()));
        assert_eq!(restored, cache);

        assert!(cache.remove_account("a"));
        assert!(!cache.remove_account("a"));
        assert_eq!(cache, TokenCache::default());

        assert_eq!(TokenCache::parse(Some("{oops")), TokenCache::default());
    }
}
