//! Scope request normalization

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CLIENT_ID_SCOPE_PREFIX, DEFAULT_CLIENT_ID, DEFAULT_TENANT, GRAPH_TACK_ON_SCOPE, OIDC_SCOPES,
    RESERVED_SCOPE_PREFIX, TENANT_SCOPE_PREFIX,
};

/// Canonical view of a raw scope request.
///
/// Construction is a pure function of the input: any permutation of the same
/// scope multiset yields an equal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeData {
    /// Scopes exactly as requested.
    pub original_scopes: Vec<String>,
    /// Sorted, deduplicated scopes.
    pub all_scopes: Vec<String>,
    /// `all_scopes` joined by a space. Used as the scope signature.
    pub scope_str: String,
    /// Scopes put on the wire; never empty.
    pub scopes_to_send: Vec<String>,
    pub client_id: String,
    pub tenant: String,
}

impl ScopeData {
    pub fn new<S: AsRef<str>>(scopes: &[S]) -> Self {
        let original_scopes: Vec<String> = scopes.iter().map(|s| s.as_ref().to_string()).collect();
        let all_scopes: Vec<String> =
            original_scopes.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();

        let client_id = last_marker_value(&all_scopes, CLIENT_ID_SCOPE_PREFIX)
            .unwrap_or(DEFAULT_CLIENT_ID)
            .to_string();
        let tenant = last_marker_value(&all_scopes, TENANT_SCOPE_PREFIX)
            .unwrap_or(DEFAULT_TENANT)
            .to_string();

        let mut scopes_to_send: Vec<String> = all_scopes
            .iter()
            .filter(|s| !s.starts_with(RESERVED_SCOPE_PREFIX) && !OIDC_SCOPES.contains(&s.as_str()))
            .cloned()
            .collect();
        if scopes_to_send.is_empty() {
            scopes_to_send.push(GRAPH_TACK_ON_SCOPE.to_string());
        }

        Self {
            scope_str: all_scopes.join(" "),
            original_scopes,
            all_scopes,
            scopes_to_send,
            client_id,
            tenant,
        }
    }

    /// Scope signature used for cache keys and log fields.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.scope_str
    }
}

fn last_marker_value<'a>(scopes: &'a [String], prefix: &str) -> Option<&'a str> {
    scopes.iter().filter_map(|s| s.strip_prefix(prefix)).last()
}
