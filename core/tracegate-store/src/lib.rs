//! Persistence for Tracegate.
//!
//! The [`GateStore`] trait is the only way the rest of the system touches
//! authoritative state. Two implementations are provided:
//!
//! - [`SqliteStore`]: the default, shared by every gate instance pointed at
//!   the same database file
//! - [`MemoryStore`]: process-local maps for tests
//!
//! In-process caches elsewhere in the workspace sit in front of a store and
//! may only ever short-circuit a denial; a cache miss always falls through
//! to the store.

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{GateStore, SweepReport, NONCE_NAMESPACE, REQUEST_HASH_NAMESPACE};
