//! # credcache Domain
//!
//! Data types for the credential cache and refresh scheduler.
//!
//! This crate contains:
//! - Scope normalization (`ScopeData`) and identity keys
//! - Account, token, session and change-event types
//! - Domain error types and Result definitions
//! - Configuration structures
//! - Identity platform constants
//!
//! ## Architecture
//! - No dependencies on other credcache crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
