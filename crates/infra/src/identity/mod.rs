//! Microsoft identity platform client
//!
//! [`OAuthPublicClient`] implements the core `PublicClientApplication` port
//! with plain OAuth 2.0 grants: PKCE authorization code for interactive
//! sign-in, refresh tokens for everything silent. No native broker is used.

pub mod claims;
mod client;
mod factory;
mod loopback;
pub mod pkce;
mod redirect;
mod token_cache;

pub use client::{OAuthClientServices, OAuthPublicClient};
pub use factory::OAuthClientFactory;
pub use loopback::LoopbackServer;
pub use redirect::{PendingRedirect, UriHandlerLoopback};
pub use token_cache::{CachedAccessToken, TokenCache};
