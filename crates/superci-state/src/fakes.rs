//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRunLedger`, which satisfies the `RunLedger` contract
//! without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

/// In-memory run ledger backed by a `HashMap<repo, Vec<RunLogEntry>>`.
///
/// A repository with no key has no history; an explicitly seeded empty
/// history reports `Untested`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    ledgers: Mutex<HashMap<String, Vec<RunLogEntry>>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty (but existing) history for `repo`.
    pub fn with_empty_history(self, repo: &RepoId) -> Self {
        self.ledgers
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default();
        self
    }

    /// Number of entries recorded for `repo`.
    pub fn len(&self, repo: &RepoId) -> usize {
        self.ledgers
            .lock()
            .unwrap()
            .get(&repo.to_string())
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, repo: &RepoId) -> bool {
        self.len(repo) == 0
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn is_tested(&self, repo: &RepoId, commit: &str) -> StorageResult<LedgerLookup> {
        let ledgers = self.ledgers.lock().unwrap();
        let lookup = match ledgers.get(&repo.to_string()) {
            None => LedgerLookup::NoHistory,
            Some(entries) if entries.iter().any(|e| e.commit == commit) => LedgerLookup::Tested,
            Some(_) => LedgerLookup::Untested,
        };
        Ok(lookup)
    }

    async fn append(&self, repo: &RepoId, entry: RunLogEntry) -> StorageResult<()> {
        let mut ledgers = self.ledgers.lock().unwrap();
        ledgers.entry(repo.to_string()).or_default().push(entry);
        Ok(())
    }

    async fn entries(&self, repo: &RepoId) -> StorageResult<Vec<RunLogEntry>> {
        let ledgers = self.ledgers.lock().unwrap();
        Ok(ledgers.get(&repo.to_string()).cloned().unwrap_or_default())
    }

    async fn lease(&self, _repo: &RepoId) -> StorageResult<LedgerLease> {
        Ok(LedgerLease::unguarded())
    }
}
