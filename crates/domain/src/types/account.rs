//! Identity-provider account records

use serde::{Deserialize, Serialize};

use crate::constants::{MSA_PASSTHRU_TID, MSA_TID};
use crate::impl_label_conversions;

/// Claims read from an account's ID token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    /// Issued-at, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Account handle owned by the identity-provider client.
///
/// Keyed by `home_account_id`; the cache only keeps these ids for diffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub home_account_id: String,
    pub environment: String,
    pub tenant_id: String,
    pub username: String,
    pub local_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_claims: Option<IdTokenClaims>,
}

impl AccountInfo {
    /// Issued-at claim of the account's ID token, if known.
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.id_token_claims.as_ref().and_then(|c| c.iat)
    }

    /// Tenant id claim of the account's ID token, if known.
    #[must_use]
    pub fn tid(&self) -> Option<&str> {
        self.id_token_claims.as_ref().and_then(|c| c.tid.as_deref())
    }
}

/// Personal vs. work/school account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicrosoftAccountType {
    Msa,
    Aad,
}

impl_label_conversions!(MicrosoftAccountType {
    Msa => "msa",
    Aad => "aad",
});

impl MicrosoftAccountType {
    /// Classify a tenant id claim. Personal accounts live in two fixed tenants.
    #[must_use]
    pub fn from_tid(tid: &str) -> Self {
        if tid == MSA_TID || tid == MSA_PASSTHRU_TID {
            Self::Msa
        } else {
            Self::Aad
        }
    }
}

#[cfg(test)]
pub(crate) fn test_account(home_account_id: &str) -> AccountInfo {
    AccountInfo {
        home_account_id: home_account_id.to_string(),
        environment: "login.microsoftonline.com".to_string(),
        tenant_id: "tenant".to_string(),
        username: format!("{home_account_id}@example.com"),
        local_account_id: home_account_id.to_string(),
        name: None,
        id_token: None,
        id_token_claims: None,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn msa_tenants_are_classified_as_personal() {
        assert_eq!(MicrosoftAccountType::from_tid(MSA_TID), MicrosoftAccountType::Msa);
        assert_eq!(MicrosoftAccountType::from_tid(MSA_PASSTHRU_TID), MicrosoftAccountType::Msa);
        assert_eq!(MicrosoftAccountType::from_tid("contoso-tid"), MicrosoftAccountType::Aad);
        assert_eq!(MicrosoftAccountType::from_str("AAD").unwrap(), MicrosoftAccountType::Aad);
    }

    #[test]
    fn claim_accessors_tolerate_missing_claims() {
        let mut account = test_account("a");
        assert_eq!(account.issued_at(), None);
        account.id_token_claims = Some(IdTokenClaims { iat: Some(42), ..Default::default() });
        assert_eq!(account.issued_at(), Some(42));
        assert_eq!(account.tid(), None);
    }
}
