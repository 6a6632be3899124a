//! Human-readable rendering of compiled graphs.
pub mod trace;

pub use trace::format_trace;
