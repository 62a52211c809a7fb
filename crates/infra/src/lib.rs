//! # credcache infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - OS keyring secret storage and a JSON-file memento
//! - The OAuth 2.0 public client (PKCE, loopback and URI-handler redirects)
//! - Configuration loading, logging and the telemetry sink
//! - [`AuthContext`], which wires all of the above into a provider
//!
//! ## Architecture
//! - Implements traits defined in `credcache-core`
//! - Contains all "impure" code (I/O, HTTP, keyring, processes)

pub mod browser;
pub mod config;
pub mod context;
pub mod errors;
pub mod http;
pub mod identity;
pub mod observability;
pub mod prompt;
pub mod storage;

pub use browser::{BrowserOpener, CommandBrowserOpener};
pub use context::AuthContext;
pub use errors::InfraError;
pub use http::{GrantReply, HttpClient, HttpClientBuilder};
pub use identity::{OAuthClientFactory, OAuthClientServices, OAuthPublicClient, UriHandlerLoopback};
pub use observability::{init_logging, TracingTelemetryReporter};
pub use prompt::StaticFallbackPrompt;
pub use storage::{JsonFileMemento, KeyringSecretStorage};
