//! Generic runtime primitives shared across credcache crates.
//!
//! Nothing in this crate knows about identities or tokens.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: the timeout and cancellation errors
//! - `runtime`: async infrastructure (sequencer, keyed delayer, emitters,
//!   event bufferer, clock, cancellation racing)
//! - `test-utils`: async assertions and polling helpers

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod events;
#[cfg(feature = "runtime")]
pub mod sync;
#[cfg(feature = "runtime")]
pub mod time;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "test-utils")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult};
#[cfg(feature = "runtime")]
pub use events::{Emitter, EventBufferer, Subscription, SubscriptionSet};
#[cfg(feature = "runtime")]
pub use sync::{DelayerByKey, Sequencer};
#[cfg(feature = "runtime")]
pub use time::{race_cancellation_and_timeout, Clock, MockClock, SystemClock};
