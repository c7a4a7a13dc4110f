//! Consolidated test modules.
//!
//! End-to-end retention scenarios run against the in-memory store with a
//! manual clock.
