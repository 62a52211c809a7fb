//! Error types used throughout the credential cache

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for credential cache operations
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CredCacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The identity platform rejected the request.
    #[error("Server error ({code}): {description}")]
    Server { code: String, description: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CredCacheError {
    /// True when the user (or a caller token) cancelled the operation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// True when the error came back from the identity platform itself.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Stable label suitable for logging fields.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::Server { .. } => "server",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for CredCacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for credential cache operations
pub type Result<T> = std::result::Result<T, CredCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display_includes_code() {
        let err = CredCacheError::Server {
            code: "invalid_grant".to_string(),
            description: "AADSTS70000".to_string(),
        };
        assert_eq!(err.to_string(), "Server error (invalid_grant): AADSTS70000");
        assert!(err.is_server_error());
        assert!(!err.is_cancellation());
    }

    #[test]
    fn serde_json_errors_become_serialization_errors() {
        let parse = serde_json::from_str::<Vec<String>>("{not json").unwrap_err();
        let err: CredCacheError = parse.into();
        assert_eq!(err.label(), "serialization");
    }

    #[test]
    fn errors_serialize_with_type_tag() {
        let json = serde_json::to_string(&CredCacheError::Cancelled("sign in".into())).unwrap();
        assert_eq!(json, r#"{"type":"Cancelled","message":"sign in"}"#);
    }
}
