//! Structural analyses over the primitive graph.
pub mod telemetry;
pub mod topology;

pub use telemetry::TelemetryReport;
