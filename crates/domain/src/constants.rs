//! Identity platform constants
//!
//! Centralized location for the client ids, tenants, scope markers, storage
//! keys and timings shared by the credential cache.

use std::time::Duration;

// Client application and tenant defaults
pub const DEFAULT_CLIENT_ID: &str = "aebc6443-996d-45c2-90f0-388ff96faa56";
pub const DEFAULT_TENANT: &str = "organizations";

// Scope markers carried inside a scope request
pub const RESERVED_SCOPE_PREFIX: &str = "VSCODE_";
pub const CLIENT_ID_SCOPE_PREFIX: &str = "VSCODE_CLIENT_ID:";
pub const TENANT_SCOPE_PREFIX: &str = "VSCODE_TENANT:";

/// OpenID Connect scopes the identity platform adds on its own.
pub const OIDC_SCOPES: [&str; 4] = ["openid", "email", "profile", "offline_access"];

/// Resource scope injected when a request only asks for identity scopes.
pub const GRAPH_TACK_ON_SCOPE: &str = "User.Read";

// Personal Microsoft account tenants
pub const MSA_TID: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";
pub const MSA_PASSTHRU_TID: &str = "f8cdef31-a31e-4b4a-93e4-5f571e91255a";

pub const REDIRECT_URI: &str = "https://vscode.dev/redirect";

/// Sessions derived from an account (not a token) carry this access token.
pub const ACCOUNT_SESSION_PLACEHOLDER_TOKEN: &str = "1234";

// Timings
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// Persistence keys
pub const MIGRATION_MEMENTO_KEY: &str = "msalMigration";
pub const LEGACY_KEY_LIST: &str = "microsoft.login.keylist";

/// Memento key holding the last account removal time for an identity.
#[must_use]
pub fn last_removal_key(client_id: &str, authority: &str) -> String {
    format!("lastRemoval:{client_id}:{authority}")
}

/// Secret key holding the active identity key list for a cloud.
#[must_use]
pub fn identity_list_secret_key(cloud_name: &str) -> String {
    format!("publicClientApplications-{cloud_name}")
}

/// Secret key holding the broker account allow-list of an identity.
#[must_use]
pub fn account_access_secret_key(cloud_name: &str, client_id: &str, authority: &str) -> String {
    format!("accounts-{cloud_name}-{client_id}-{authority}")
}
