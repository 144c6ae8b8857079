//! Storage trait definitions for SuperCI
//!
//! `RunLedger` is the single storage abstraction: an append-only history of
//! completed trigger runs, keyed per repository, queried by commit SHA before
//! a build is scheduled.
//!
//! All methods are async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RepoId
// ---------------------------------------------------------------------------

/// Repository identity on the hosting service (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Relative directory for this repository under a root (`owner/name`).
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.owner).join(&self.name)
    }
}

impl std::str::FromStr for RepoId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidRepository {
            repository: s.to_string(),
        };
        let (owner, name) = s.split_once('/').ok_or_else(invalid)?;
        let valid_part = |p: &str| {
            !p.is_empty() && p != "." && p != ".." && !p.contains(['/', '\\'])
        };
        if !valid_part(owner) || !valid_part(name) {
            return Err(invalid());
        }
        Ok(RepoId::new(owner, name))
    }
}

impl TryFrom<String> for RepoId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RepoId> for String {
    fn from(repo: RepoId) -> Self {
        repo.to_string()
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// RunLogEntry
// ---------------------------------------------------------------------------

/// One completed trigger, as persisted in the run ledger.
///
/// The on-disk schema must stay readable by older and newer pollers:
/// unknown keys are ignored and `log_files` may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// Source branch of the pull request
    pub branch: String,
    /// Full commit SHA that was tested
    pub commit: String,
    /// When the trigger was processed (not the commit time)
    pub datetime: DateTime<Utc>,
    /// Sum of absolute step exit codes, or -1 for a configuration error
    pub aggregate_status: i64,
    /// Stdout log of every compiled step, including steps that never ran
    #[serde(default)]
    pub log_files: Vec<PathBuf>,
}

impl RunLogEntry {
    pub fn passed(&self) -> bool {
        self.aggregate_status == 0
    }
}

/// Answer to "has this commit been tested?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerLookup {
    /// A ledger exists but does not mention the commit
    Untested,
    /// The commit appears in the ledger
    Tested,
    /// No ledger exists yet for the repository
    NoHistory,
}

impl LedgerLookup {
    /// Both `Untested` and `NoHistory` mean the commit should be built.
    pub fn should_test(&self) -> bool {
        !matches!(self, LedgerLookup::Tested)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerLookup::Untested => "untested",
            LedgerLookup::Tested => "tested",
            LedgerLookup::NoHistory => "no_history",
        }
    }
}

// ---------------------------------------------------------------------------
// LedgerLease
// ---------------------------------------------------------------------------

/// Advisory lease over a repository's ledger.
///
/// Held from the dedup lookup until the run-log append. Dropping the lease
/// removes the lease file, but only while it still names this holder.
#[derive(Debug)]
pub struct LedgerLease {
    path: Option<PathBuf>,
    holder: String,
}

impl LedgerLease {
    /// A lease backed by a file on disk.
    pub fn held(path: PathBuf, holder: String) -> Self {
        Self {
            path: Some(path),
            holder,
        }
    }

    /// A lease for backends that need no cross-process exclusion.
    pub fn unguarded() -> Self {
        Self {
            path: None,
            holder: "in-process".to_string(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for LedgerLease {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::read_to_string(&path) {
            Ok(content) if content.contains(&self.holder) => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to release ledger lease");
                }
            }
            Ok(_) => {
                warn!(path = %path.display(), "Ledger lease was taken over by another holder");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read ledger lease on release");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RunLedger
// ---------------------------------------------------------------------------

/// Per-repository run ledger.
///
/// Guarantees:
/// - `entries` returns entries in append order.
/// - `append` never rewrites or drops earlier entries.
/// - Uniqueness of commits is NOT enforced on write; callers check
///   `is_tested` under a `lease` before scheduling.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Look up whether `commit` was already tested for `repo`.
    async fn is_tested(&self, repo: &RepoId, commit: &str) -> StorageResult<LedgerLookup>;

    /// Append a completed run.
    async fn append(&self, repo: &RepoId, entry: RunLogEntry) -> StorageResult<()>;

    /// Full history for `repo`, oldest first. Empty if no ledger exists.
    async fn entries(&self, repo: &RepoId) -> StorageResult<Vec<RunLogEntry>>;

    /// Acquire the advisory lease spanning lookup through append.
    async fn lease(&self, repo: &RepoId) -> StorageResult<LedgerLease>;
}
