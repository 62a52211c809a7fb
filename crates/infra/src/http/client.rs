use std::time::Duration;

use credcache_domain::{CredCacheError, Result};
use reqwest::{Client as ReqwestClient, StatusCode};
use tracing::{debug, info_span, warn, Instrument};

use crate::errors::InfraError;

/// Status and body of a token endpoint reply.
#[derive(Debug, Clone)]
pub struct GrantReply {
    pub status: StatusCode,
    pub body: String,
}

/// Transport for grants posted to an identity-platform token endpoint.
///
/// A grant is bounded by one deadline covering every attempt. Attempts that
/// hit a 5xx, a 429 or a connection failure are retried with exponential
/// backoff. Other 4xx replies carry an OAuth error body and come straight
/// back: retrying them would replay an authorization code that is already
/// spent.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: ReqwestClient,
    max_attempts: usize,
    base_backoff: Duration,
    grant_timeout: Duration,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// POST `form` to `endpoint` on behalf of `client_id` at `authority`.
    pub async fn post_grant(
        &self,
        client_id: &str,
        authority: &str,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<GrantReply> {
        let grant_type =
            form.iter().find(|(name, _)| *name == "grant_type").map_or("", |(_, value)| *value);
        let span = info_span!("token_grant", client_id, authority, grant_type);

        let attempts = self.attempts(endpoint, form).instrument(span.clone());
        match tokio::time::timeout(self.grant_timeout, attempts).await {
            Ok(reply) => reply,
            Err(_) => {
                span.in_scope(|| warn!(timeout = ?self.grant_timeout, "token grant timed out"));
                Err(CredCacheError::Timeout(format!(
                    "token grant for {client_id} at {authority} exceeded {:?}",
                    self.grant_timeout
                )))
            }
        }
    }

    async fn attempts(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<GrantReply> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= attempts;
            match self.client.post(endpoint).form(form).send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt, %status, "token endpoint replied");
                    if is_transient(status) && !last {
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }
                    let body = response.text().await.map_err(InfraError::from)?;
                    return Ok(GrantReply { status, body });
                }
                Err(err) => {
                    debug!(attempt, error = %err, "token endpoint unreachable");
                    if !last && (err.is_connect() || err.is_timeout()) {
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }
                    return Err(InfraError::from(err).into());
                }
            }
        }
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    attempt_timeout: Duration,
    grant_timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            grant_timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            user_agent: None,
        }
    }
}

impl HttpClientBuilder {
    /// Bound on a single request.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Bound on a whole grant, retries and backoff included.
    pub fn grant_timeout(mut self, timeout: Duration) -> Self {
        self.grant_timeout = timeout;
        self
    }

    /// Total attempts per grant, the first one included.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut builder = ReqwestClient::builder().timeout(self.attempt_timeout).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder.build().map_err(InfraError::from)?;

        Ok(HttpClient {
            client,
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
            grant_timeout: self.grant_timeout,
        })
    }
}
