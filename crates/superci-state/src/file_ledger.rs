//! File-backed run ledger.
//!
//! Layout: `<root>/<owner>/<name>/superci-log.yaml`, a YAML sequence of
//! `RunLogEntry`. The file is read in full on every lookup and rewritten
//! atomically (temp file + rename) on append, so a crash mid-write never
//! leaves a truncated ledger behind.
//!
//! A sibling `superci-log.lease` file serves as the advisory lease.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Ledger file name inside each repository directory.
pub const LEDGER_FILE: &str = "superci-log.yaml";

/// Lease file name inside each repository directory.
pub const LEASE_FILE: &str = "superci-log.lease";

/// Leases older than this are treated as abandoned by a crashed poller.
const DEFAULT_LEASE_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// YAML-file run ledger rooted at a log directory (typically `~/.superci`).
#[derive(Debug, Clone)]
pub struct FileRunLedger {
    root: PathBuf,
    lease_ttl: Duration,
}

impl FileRunLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lease_ttl: Duration::hours(DEFAULT_LEASE_TTL_HOURS),
        }
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the ledger file for `repo`.
    pub fn ledger_path(&self, repo: &RepoId) -> PathBuf {
        self.root.join(repo.relative_dir()).join(LEDGER_FILE)
    }

    fn lease_path(&self, repo: &RepoId) -> PathBuf {
        self.root.join(repo.relative_dir()).join(LEASE_FILE)
    }

    /// Read the ledger; `None` when the file does not exist.
    fn read_entries(path: &Path) -> StorageResult<Option<Vec<RunLogEntry>>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        if content.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        let entries: Vec<RunLogEntry> =
            serde_saphyr::from_str(&content).map_err(|e| StorageError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Some(entries))
    }

    fn write_entries(path: &Path, entries: &[RunLogEntry]) -> StorageResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("ledger path has no parent")))?;
        fs::create_dir_all(dir)?;

        let yaml = serde_saphyr::to_string(&entries)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn try_create_lease(path: &Path, record: &LeaseRecord) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let body = serde_json::to_string(record).map_err(std::io::Error::other)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()
    }

    fn read_lease(path: &Path) -> Option<LeaseRecord> {
        fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
    }
}

#[async_trait]
impl RunLedger for FileRunLedger {
    async fn is_tested(&self, repo: &RepoId, commit: &str) -> StorageResult<LedgerLookup> {
        let path = self.ledger_path(repo);
        let lookup = match Self::read_entries(&path)? {
            None => LedgerLookup::NoHistory,
            Some(entries) if entries.iter().any(|e| e.commit == commit) => LedgerLookup::Tested,
            Some(_) => LedgerLookup::Untested,
        };
        debug!(repository = %repo, commit = %commit, lookup = lookup.as_str(), "Ledger lookup");
        Ok(lookup)
    }

    async fn append(&self, repo: &RepoId, entry: RunLogEntry) -> StorageResult<()> {
        let path = self.ledger_path(repo);
        let mut entries = Self::read_entries(&path)?.unwrap_or_default();
        let commit = entry.commit.clone();
        entries.push(entry);
        Self::write_entries(&path, &entries)?;
        debug!(
            repository = %repo,
            commit = %commit,
            total = entries.len(),
            "Run log entry appended"
        );
        Ok(())
    }

    async fn entries(&self, repo: &RepoId) -> StorageResult<Vec<RunLogEntry>> {
        Ok(Self::read_entries(&self.ledger_path(repo))?.unwrap_or_default())
    }

    async fn lease(&self, repo: &RepoId) -> StorageResult<LedgerLease> {
        let path = self.lease_path(repo);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let record = LeaseRecord {
            holder: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        // Second attempt only happens after breaking a stale lease.
        for _ in 0..2 {
            match Self::try_create_lease(&path, &record) {
                Ok(()) => {
                    debug!(path = %path.display(), holder = %record.holder, "Ledger lease acquired");
                    return Ok(LedgerLease::held(path, record.holder));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    // Unreadable lease files count as stale.
                    if let Some(existing) = Self::read_lease(&path) {
                        if Utc::now() - existing.acquired_at <= self.lease_ttl {
                            return Err(StorageError::LeaseHeld {
                                path,
                                holder: format!("{} (pid {})", existing.holder, existing.pid),
                                acquired_at: existing.acquired_at.to_rfc3339(),
                            });
                        }
                    }
                    warn!(path = %path.display(), "Breaking stale ledger lease");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(StorageError::Io(e)),
                    }
                }
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        let existing = Self::read_lease(&path);
        Err(StorageError::LeaseHeld {
            path,
            holder: existing
                .as_ref()
                .map(|l| l.holder.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            acquired_at: existing
                .map(|l| l.acquired_at.to_rfc3339())
                .unwrap_or_default(),
        })
    }
}
