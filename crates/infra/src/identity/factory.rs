use std::sync::Arc;

use credcache_core::{PublicClientApplication, PublicClientConfig, PublicClientFactory};
use credcache_domain::Result;
use tracing::debug;

use super::client::{OAuthClientServices, OAuthPublicClient};

/// Builds one [`OAuthPublicClient`] per identity, all sharing the same HTTP
/// client, browser and redirect handler.
#[derive(Clone)]
pub struct OAuthClientFactory {
    services: OAuthClientServices,
}

impl OAuthClientFactory {
    pub fn new(services: OAuthClientServices) -> Self {
        Self { services }
    }
}

impl PublicClientFactory for OAuthClientFactory {
    fn create(&self, config: &PublicClientConfig) -> Result<Arc<dyn PublicClientApplication>> {
        debug!(
            client_id = %config.key.client_id,
            authority = %config.key.authority,
            "creating OAuth public client"
        );
        let client = OAuthPublicClient::new(
            &config.key,
            Arc::clone(&config.cache_plugin),
            self.services.clone(),
        )?;
        Ok(Arc::new(client))
    }
}
