//! Serialization and debouncing primitives
//!
//! ## Submodules
//!
//! - **`sequencer`**: FIFO queue running one async task at a time
//! - **`delayer`**: keyed debounced timers, one pending timer per key

pub mod delayer;
pub mod sequencer;

pub use delayer::DelayerByKey;
pub use sequencer::Sequencer;
