//! Pull request cache for one repository.
//!
//! This module keeps the branch to pull request snapshot on disk and decides,
//! per run, whether to serve it, refresh it conditionally, or fall back to it:
//! - `CacheStorage` persists one JSON entry, replaced atomically
//! - `merge` reconciles open, closed and prior pull requests
//! - `Directives` turn flags and environment into a `Plan`
//! - `CacheLayer` runs the whole sync and never fails outright

mod layer;
mod merge;
mod mode;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use mode::{Directives, Plan};
pub use storage::{CacheStorage, FileStorage, NoopStorage};
pub use traits::{CacheSource, SyncResult};
