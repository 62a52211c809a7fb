//! Authorization redirects delivered by the host application
//!
//! With [`RedirectKind::UriHandler`](credcache_domain::RedirectKind) the
//! identity platform redirects to a fixed web page that hands the URL back
//! to the host, which forwards it to [`UriHandlerLoopback::handle_uri`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use credcache_domain::constants::REDIRECT_URI;
use credcache_domain::{CredCacheError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

type Waiters = Mutex<HashMap<String, oneshot::Sender<Result<String>>>>;

/// Outcome carried by redirect query parameters: the code, or the error the
/// identity platform reported.
pub(crate) fn redirect_result(params: &HashMap<String, String>) -> Result<String> {
    if let Some(error) = params.get("error") {
        let description = params.get("error_description").cloned().unwrap_or_default();
        if error == "access_denied" {
            return Err(CredCacheError::Cancelled(format!("sign-in declined: {description}")));
        }
        return Err(CredCacheError::Server { code: error.clone(), description });
    }
    params.get("code").cloned().ok_or_else(|| {
        CredCacheError::InvalidInput("redirect carried neither a code nor an error".into())
    })
}

/// Routes host-delivered redirect URLs to the sign-in waiting on their state.
#[derive(Default)]
pub struct UriHandlerLoopback {
    waiters: Arc<Waiters>,
}

impl UriHandlerLoopback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirect_uri(&self) -> &'static str {
        REDIRECT_URI
    }

    /// Wait for the redirect carrying `state`.
    pub fn register(&self, state: &str) -> PendingRedirect {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(state.to_string(), tx);
        PendingRedirect { state: state.to_string(), rx, waiters: Arc::downgrade(&self.waiters) }
    }

    /// Deliver a redirect URL. Returns `false` when no sign-in is waiting
    /// for its state.
    pub fn handle_uri(&self, uri: &str) -> bool {
        let Ok(url) = Url::parse(uri) else {
            debug!("ignoring unparseable redirect uri");
            return false;
        };
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let Some(state) = params.get("state") else {
            debug!("ignoring redirect without state");
            return false;
        };
        let Some(waiter) = self.waiters.lock().remove(state) else {
            debug!("ignoring redirect for unknown state");
            return false;
        };
        waiter.send(redirect_result(&params)).is_ok()
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// A sign-in waiting for its redirect. Dropping it unregisters the state.
pub struct PendingRedirect {
    state: String,
    rx: oneshot::Receiver<Result<String>>,
    waiters: Weak<Waiters>,
}

impl PendingRedirect {
    pub async fn wait(&mut self) -> Result<String> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(CredCacheError::Cancelled("redirect handler was dropped".into())),
        }
    }
}

impl Drop for PendingRedirect {
    fn drop(&mut self) {
        if let Some(waiters) = self.waiters.upgrade() {
            waiters.lock().remove(&self.state);
        }
    }
}
