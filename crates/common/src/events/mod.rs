//! Observer primitives
//!
//! - **`emitter`**: typed event emitter with disposable subscriptions
//! - **`bufferer`**: coalesces bursts of events into one merged delivery

pub mod bufferer;
pub mod emitter;

pub use bufferer::EventBufferer;
pub use emitter::{Emitter, Subscription, SubscriptionSet};
