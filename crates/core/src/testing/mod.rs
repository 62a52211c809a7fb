//! In-memory implementations of every port, for tests
//!
//! Available to this crate's tests and, through the `test-utils` feature, to
//! downstream crates.

pub mod mocks;

pub use mocks::{
    account, InteractiveStep, MockBackend, MockClientFactory, MockLegacySessionStore,
    MockMemento, MockPublicClient, MockSecretStorage, RecordingTelemetry, ScriptedPrompt,
    TelemetryEvent,
};
