//! Domain types and models

pub mod account;
pub mod events;
pub mod identity;
pub mod scope;
pub mod session;
pub mod token;

pub use account::{AccountInfo, IdTokenClaims, MicrosoftAccountType};
pub use events::AccountsChangeEvent;
pub use identity::IdentityKey;
pub use scope::ScopeData;
pub use session::{
    AuthenticationSession, CreateSessionOptions, GetSessionsOptions, LegacySession,
    SessionAccount, SessionsChangeEvent,
};
pub use token::{
    AuthenticationResult, InteractiveRequest, RedirectKind, RefreshTokenRequest, SilentFlowRequest,
};
