//! `id_token` decoding
//!
//! The token is only decoded, not validated: it was received directly from
//! the token endpoint over TLS and is used for display and keying.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use credcache_domain::{AccountInfo, CredCacheError, IdTokenClaims, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawClaims {
    oid: Option<String>,
    sub: Option<String>,
    tid: Option<String>,
    iat: Option<i64>,
    preferred_username: Option<String>,
    email: Option<String>,
    upn: Option<String>,
    name: Option<String>,
}

fn decode_payload(id_token: &str) -> Result<RawClaims> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(CredCacheError::InvalidInput("invalid ID token format".into()));
    }

    let payload = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).map_err(|err| {
        CredCacheError::InvalidInput(format!("failed to decode ID token payload: {err}"))
    })?;

    serde_json::from_slice(&payload).map_err(|err| {
        CredCacheError::InvalidInput(format!("failed to parse ID token payload: {err}"))
    })
}

/// Claims the cache keys and displays accounts by.
pub fn decode_id_token_claims(id_token: &str) -> Result<IdTokenClaims> {
    let raw = decode_payload(id_token)?;
    Ok(IdTokenClaims {
        tid: raw.tid,
        oid: raw.oid,
        iat: raw.iat,
        preferred_username: raw.preferred_username,
        name: raw.name,
    })
}

/// Build the account record for an `id_token` issued by `environment`.
///
/// The home account id is `{oid}.{tid}`, the identity platform's own
/// convention, so the same user in two tenants yields two accounts.
pub fn account_from_id_token(id_token: &str, environment: &str) -> Result<AccountInfo> {
    let raw = decode_payload(id_token)?;
    let object_id = raw.oid.clone().or_else(|| raw.sub.clone()).ok_or_else(|| {
        CredCacheError::InvalidInput("ID token carries neither oid nor sub".into())
    })?;
    let tenant_id = raw
        .tid
        .clone()
        .ok_or_else(|| CredCacheError::InvalidInput("ID token missing tid claim".into()))?;
    let username = raw
        .preferred_username
        .clone()
        .or_else(|| raw.email.clone())
        .or_else(|| raw.upn.clone())
        .unwrap_or_default();

    Ok(AccountInfo {
        home_account_id: format!("{object_id}.{tenant_id}"),
        environment: environment.to_string(),
        tenant_id: tenant_id.clone(),
        username,
        local_account_id: object_id,
        name: raw.name.clone(),
        id_token: Some(id_token.to_string()),
        id_token_claims: Some(IdTokenClaims {
            tid: Some(tenant_id),
            oid: raw.oid,
            iat: raw.iat,
            preferred_username: raw.preferred_username,
            name: raw.name,
        }),
    })
}

#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}
