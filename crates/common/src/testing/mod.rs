//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: `assert_eventually_async!`, [`wait_for`],
//!   [`timeout_ok`]
//!
//! Time control lives in [`crate::time::MockClock`].

pub mod async_utils;

// Note: Macros exported with #[macro_export] are available at crate root
pub use async_utils::{timeout_ok, wait_for};
pub use crate::time::{Clock, MockClock, SystemClock};
