//! Observability: structured logging and counters.
//!
//! - Log subscriber setup with pretty, compact or JSON output (`cli` feature)
//! - Deletion and reconcile counters through the `metrics` facade (`metrics` feature)

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
