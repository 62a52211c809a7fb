//! Logging setup and the telemetry sink
//!
//! [`init_logging`] installs the global `tracing` subscriber;
//! [`TracingTelemetryReporter`] turns provider telemetry into structured
//! events and keeps running counters for diagnostics.

mod logging;
mod telemetry;

pub use logging::init_logging;
pub use telemetry::{TelemetrySnapshot, TracingTelemetryReporter};
