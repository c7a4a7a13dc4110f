//! Record store access for builds, build runs and task runs.
//!
//! The reconciler only needs get, list and delete. [`MemoryStore`] backs the
//! one-shot sweep command and the tests; production deployments plug in an
//! adapter for their control plane's API.

mod error;
mod memory;
mod traits;

pub use error::{OptionalExt, StoreError, StoreResult};
pub use memory::{MemoryStore, StoreSnapshot};
pub use traits::RecordStore;
