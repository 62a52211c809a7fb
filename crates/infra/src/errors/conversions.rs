//! Conversions from external infrastructure errors into domain errors.

use std::io::{Error as IoError, ErrorKind};

use credcache_domain::CredCacheError;
use keyring::Error as KeyringError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CredCacheError);

impl From<InfraError> for CredCacheError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CredCacheError> for InfraError {
    fn from(value: CredCacheError) -> Self {
        InfraError(value)
    }
}

trait IntoCredCacheError {
    fn into_credcache(self) -> CredCacheError;
}

/* -------------------------------------------------------------------------- */
/* keyring::Error → CredCacheError */
/* -------------------------------------------------------------------------- */

impl IntoCredCacheError for KeyringError {
    fn into_credcache(self) -> CredCacheError {
        use KeyringError::*;

        let description = self.to_string();

        match self {
            NoEntry => CredCacheError::NotFound("keyring entry not found".into()),
            BadEncoding(_) => {
                CredCacheError::Storage("secret in keyring is not valid UTF-8".into())
            }
            TooLong(name, limit) => CredCacheError::Storage(format!(
                "keyring attribute '{name}' exceeds platform limit ({limit})"
            )),
            Invalid(attr, reason) => {
                CredCacheError::Storage(format!("keyring attribute '{attr}' is invalid: {reason}"))
            }
            Ambiguous(entries) => CredCacheError::Storage(format!(
                "multiple keyring entries matched request ({} results)",
                entries.len()
            )),
            PlatformFailure(err) => {
                CredCacheError::Storage(format!("keyring platform error: {err}"))
            }
            NoStorageAccess(err) => {
                CredCacheError::Storage(format!("unable to access secure storage: {err}"))
            }
            _ => CredCacheError::Storage(description),
        }
    }
}

impl From<KeyringError> for InfraError {
    fn from(value: KeyringError) -> Self {
        InfraError(value.into_credcache())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CredCacheError */
/* -------------------------------------------------------------------------- */

impl IntoCredCacheError for HttpError {
    fn into_credcache(self) -> CredCacheError {
        if self.is_timeout() {
            return CredCacheError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return CredCacheError::Network("HTTP connection failure".into());
        }

        if self.is_decode() {
            return CredCacheError::Serialization(format!("invalid HTTP response body: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => CredCacheError::Auth(message),
                404 => CredCacheError::NotFound(message),
                429 => CredCacheError::Network(message),
                400..=499 => CredCacheError::InvalidInput(message),
                _ => CredCacheError::Network(message),
            };
        }

        CredCacheError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_credcache())
    }
}

/* -------------------------------------------------------------------------- */
/* std::io::Error → CredCacheError */
/* -------------------------------------------------------------------------- */

impl IntoCredCacheError for IoError {
    fn into_credcache(self) -> CredCacheError {
        match self.kind() {
            ErrorKind::NotFound => CredCacheError::NotFound(self.to_string()),
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => {
                CredCacheError::Network(format!("unable to bind loopback listener: {self}"))
            }
            _ => CredCacheError::Storage(self.to_string()),
        }
    }
}

impl From<IoError> for InfraError {
    fn from(value: IoError) -> Self {
        InfraError(value.into_credcache())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn keyring_no_entry_maps_to_not_found() {
        let mapped: CredCacheError = InfraError::from(KeyringError::NoEntry).into();
        match mapped {
            CredCacheError::NotFound(msg) => assert!(msg.contains("keyring")),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn io_errors_map_by_kind() {
        let missing: CredCacheError =
            InfraError::from(IoError::new(ErrorKind::NotFound, "gone")).into();
        assert!(matches!(missing, CredCacheError::NotFound(_)));

        let denied: CredCacheError =
            InfraError::from(IoError::new(ErrorKind::PermissionDenied, "nope")).into();
        assert!(matches!(denied, CredCacheError::Storage(_)));
    }

    #[tokio::test]
    async fn http_status_401_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(StatusCode::UNAUTHORIZED))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err();

        let mapped: CredCacheError = InfraError::from(error).into();
        match mapped {
            CredCacheError::Auth(msg) => assert!(msg.contains("401")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }
}
