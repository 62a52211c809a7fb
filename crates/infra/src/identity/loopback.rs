//! Loopback HTTP server receiving the authorization redirect

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use credcache_domain::{CredCacheError, Result};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::redirect::redirect_result;

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Sign-in Complete</title></head>
<body><h1>You are signed in</h1><p>You can close this window.</p></body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Sign-in Failed</title></head>
<body><h1>Sign-in failed</h1><p>Return to the application for details.</p></body>
</html>"#;

struct CallbackState {
    expected_state: String,
    sender: Mutex<Option<oneshot::Sender<Result<String>>>>,
}

/// Serves `http://localhost:{port}/` until the first redirect carrying the
/// expected state arrives. Dropping the server stops it.
pub struct LoopbackServer {
    port: u16,
    code_rx: oneshot::Receiver<Result<String>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LoopbackServer {
    /// Bind an ephemeral port on 127.0.0.1 and start serving.
    pub async fn start(expected_state: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|err| {
            CredCacheError::Network(format!("failed to bind loopback server: {err}"))
        })?;
        let port = listener
            .local_addr()
            .map_err(|err| CredCacheError::Network(format!("failed to determine port: {err}")))?
            .port();

        let (code_tx, code_rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state: expected_state.into(),
            sender: Mutex::new(Some(code_tx)),
        });
        let app = Router::new().route("/", get(handle_redirect)).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!(error = %err, "loopback server error");
            }
        });
        debug!(port, "loopback server listening");

        Ok(Self { port, code_rx, shutdown_tx: Some(shutdown_tx), handle: Some(handle) })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI used in the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Wait for the redirect. Unbounded: the caller races this against its
    /// own timeout and cancellation.
    pub async fn wait_for_code(&mut self) -> Result<String> {
        match (&mut self.code_rx).await {
            Ok(result) => result,
            Err(_) => Err(CredCacheError::Internal("loopback server stopped".into())),
        }
    }

    /// Shut down gracefully.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    return Err(CredCacheError::Internal(format!(
                        "loopback server panicked: {err}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

async fn handle_redirect(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    if params.get("state") != Some(&state.expected_state) {
        debug!("loopback redirect with unexpected state ignored");
        return Html(FAILURE_PAGE);
    }

    let result = redirect_result(&params);
    let page = if result.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
    if let Some(sender) = state.sender.lock().take() {
        let _ = sender.send(result);
    }
    Html(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn visit(server: &LoopbackServer, query: &str) -> String {
        let url = format!("http://127.0.0.1:{}/?{query}", server.port());
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(url)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }

    /// Validates CSRF state checking on the loopback redirect.
    ///
    /// Assertions:
    /// - a redirect with the wrong state is refused and does not complete
    /// - the matching redirect delivers its code and shows the success page
    #[tokio::test]
    async fn only_the_expected_state_completes() {
        let mut server = LoopbackServer::start("expected").await.unwrap();
        assert!(server.redirect_uri().starts_with("http://localhost:"));

        let refused = visit(&server, "code=evil&state=forged").await;
        assert!(refused.contains("Sign-in failed"));

        let accepted = visit(&server, "code=good&state=expected").await;
        assert!(accepted.contains("signed in"));

        assert_eq!(server.wait_for_code().await.unwrap(), "good");
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn platform_error_is_delivered() {
        let mut server = LoopbackServer::start("s").await.unwrap();

        let page = visit(&server, "error=server_error&error_description=boom&state=s").await;
        assert!(page.contains("Sign-in failed"));

        let err = server.wait_for_code().await.unwrap_err();
        assert!(err.is_server_error());
    }
}
