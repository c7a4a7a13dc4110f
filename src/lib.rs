//! Retention reconciler for build pipelines.
//!
//! Keeps the set of completed build runs within each build's retention
//! policy: count limits per outcome and time-to-live after completion.
//! Deleting a run cascades to its task run.
//!
//! The crate is organised leaves first:
//! - [`store`]: get, list and delete access to builds, runs and task runs
//! - [`models`]: builds, runs and retention policies
//! - [`retention`]: selection, expiry, deletion, the reconciler and the
//!   controller that drives it from watch events
//! - [`config`], [`observability`], [`clock`]: the supporting stack

pub mod clock;
pub mod config;
pub mod models;
pub mod observability;
pub mod retention;
pub mod store;

#[cfg(test)]
mod tests;
