//! Time utilities and abstractions
//!
//! - **[`clock`]**: wall clock abstraction with a settable mock for tests
//! - **[`race`]**: racing a future against cancellation and a deadline

pub mod clock;
pub mod race;

pub use clock::{Clock, MockClock, SystemClock};
pub use race::race_cancellation_and_timeout;
