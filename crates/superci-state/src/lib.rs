//! SuperCI State: run ledger persistence
//!
//! This crate owns the only durable state SuperCI has: the per-repository
//! record of which commits were already tested.
//!
//! ## Key Components
//!
//! - `RunLedger`: backend-agnostic ledger trait (lookup, append, lease)
//! - `FileRunLedger`: YAML file store with an advisory lease file
//! - `MemoryRunLedger`: in-memory fake for tests

mod error;
pub mod fakes;
pub mod file_ledger;
pub mod storage_traits;

pub use error::StorageError;
pub use file_ledger::FileRunLedger;
pub use storage_traits::{
    LedgerLease, LedgerLookup, RepoId, RunLedger, RunLogEntry, StorageResult,
};
