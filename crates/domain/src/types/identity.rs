//! Identity keys

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CredCacheError, Result};

/// `(client_id, authority)` pair naming one per-identity token cache.
///
/// The canonical string form is the JSON object
/// `{"clientId":"…","authority":"…"}` with keys in that order; it is used as
/// both the persisted key and the in-memory map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKey {
    pub client_id: String,
    pub authority: String,
}

impl IdentityKey {
    pub fn new(client_id: impl Into<String>, authority: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), authority: authority.into() }
    }

    #[must_use]
    pub fn to_storage_key(&self) -> String {
        format!(
            "{{\"clientId\":{},\"authority\":{}}}",
            Value::String(self.client_id.clone()),
            Value::String(self.authority.clone())
        )
    }

    pub fn from_storage_key(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            CredCacheError::Serialization(format!("invalid identity key {raw:?}: {e}"))
        })
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_canonical_json() {
        let key = IdentityKey::new("abc", "https://login.microsoftonline.com/organizations");
        assert_eq!(
            key.to_storage_key(),
            r#"{"clientId":"abc","authority":"https://login.microsoftonline.com/organizations"}"#
        );
        assert_eq!(IdentityKey::from_storage_key(&key.to_storage_key()).unwrap(), key);
    }

    #[test]
    fn storage_key_escapes_quotes() {
        let key = IdentityKey::new("a\"b", "c");
        assert_eq!(IdentityKey::from_storage_key(&key.to_storage_key()).unwrap(), key);
    }

    #[test]
    fn malformed_key_is_a_serialization_error() {
        let err = IdentityKey::from_storage_key("not json").unwrap_err();
        assert!(matches!(err, CredCacheError::Serialization(_)));
    }
}
