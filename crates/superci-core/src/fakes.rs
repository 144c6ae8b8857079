//! In-memory fakes for the pipeline seams (testing only)
//!
//! Provides `FakeHosting`, `FakeCheckout` and `ScriptedScheduler`, which
//! satisfy the `HostingService`, `SourceCheckout` and `Scheduler` contracts
//! without network access, git or a batch system.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::checkout::{CheckoutRequest, SourceCheckout};
use crate::compiler::CompiledStep;
use crate::error::{CheckoutError, SchedulerError};
use crate::hosting::*;
use crate::runner::Scheduler;

// ---------------------------------------------------------------------------
// FakeHosting
// ---------------------------------------------------------------------------

/// Hosting service backed by fixed pull requests, commits and comments.
///
/// Every posted status is recorded in order.
#[derive(Debug, Default)]
pub struct FakeHosting {
    pulls: Vec<PullRequest>,
    commits: HashMap<u64, Commit>,
    comments: Mutex<HashMap<u64, Vec<Comment>>>,
    statuses: Mutex<Vec<(String, StatusUpdate)>>,
    fail_listing: bool,
    fail_statuses: bool,
    failing_comments: HashSet<u64>,
}

impl FakeHosting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open pull request whose latest commit is `commit`.
    pub fn with_pull(mut self, pr: PullRequest, commit: Commit) -> Self {
        self.commits.insert(pr.number, commit);
        self.pulls.push(pr);
        self
    }

    pub fn with_comment(self, number: u64, comment: Comment) -> Self {
        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(comment);
        self
    }

    /// Listing open pull requests fails.
    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Every status post fails.
    pub fn failing_statuses(mut self) -> Self {
        self.fail_statuses = true;
        self
    }

    /// Reading comments of pull request `number` fails.
    pub fn failing_comments(mut self, number: u64) -> Self {
        self.failing_comments.insert(number);
        self
    }

    /// Post a comment after construction.
    pub fn push_comment(&self, number: u64, comment: Comment) {
        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(comment);
    }

    /// Statuses posted so far as `(sha, update)`.
    pub fn statuses(&self) -> Vec<(String, StatusUpdate)> {
        self.statuses.lock().unwrap().clone()
    }

    /// States posted so far, in order.
    pub fn states(&self) -> Vec<CommitState> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, update)| update.state)
            .collect()
    }
}

#[async_trait]
impl HostingService for FakeHosting {
    async fn list_open_pulls(&self, _base: &str) -> Result<Vec<PullRequest>, HostingError> {
        if self.fail_listing {
            return Err(HostingError::Http("connection refused".to_string()));
        }
        Ok(self.pulls.clone())
    }

    async fn latest_commit(&self, pr: &PullRequest) -> Result<Commit, HostingError> {
        self.commits
            .get(&pr.number)
            .cloned()
            .ok_or(HostingError::NoCommits(pr.number))
    }

    async fn comments(&self, pr: &PullRequest) -> Result<Vec<Comment>, HostingError> {
        if self.failing_comments.contains(&pr.number) {
            return Err(HostingError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(&pr.number)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_status(&self, sha: &str, status: &StatusUpdate) -> Result<(), HostingError> {
        if self.fail_statuses {
            return Err(HostingError::Api {
                status: 422,
                message: "validation failed".to_string(),
            });
        }
        self.statuses
            .lock()
            .unwrap()
            .push((sha.to_string(), status.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCheckout
// ---------------------------------------------------------------------------

/// A recorded checkout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCheckout {
    pub clone_url: String,
    pub branch: String,
    pub commit: String,
    pub dest: PathBuf,
}

/// Checkout that writes fixed files into the destination instead of cloning.
#[derive(Debug, Default)]
pub struct FakeCheckout {
    files: Vec<(PathBuf, String)>,
    fail: bool,
    requests: Mutex<Vec<RecordedCheckout>>,
}

impl FakeCheckout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `contents` at `relative` inside every checkout.
    pub fn with_file(mut self, relative: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.push((relative.into(), contents.into()));
        self
    }

    /// Every checkout fails as if the clone were rejected.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<RecordedCheckout> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceCheckout for FakeCheckout {
    async fn checkout(&self, request: &CheckoutRequest<'_>) -> Result<(), CheckoutError> {
        self.requests.lock().unwrap().push(RecordedCheckout {
            clone_url: request.clone_url.to_string(),
            branch: request.branch.to_string(),
            commit: request.commit.to_string(),
            dest: request.dest.to_path_buf(),
        });

        if self.fail {
            return Err(CheckoutError::Git {
                command: "clone".to_string(),
                code: 128,
                stderr: "fatal: repository not found".to_string(),
            });
        }

        for (relative, contents) in &self.files {
            let path = request.dest.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedScheduler
// ---------------------------------------------------------------------------

/// Scheduler returning a fixed exit code per step name (0 if unlisted).
#[derive(Debug, Default)]
pub struct ScriptedScheduler {
    exit_codes: HashMap<String, i32>,
    launch_failures: HashSet<String>,
    invoked: Mutex<Vec<PathBuf>>,
}

impl ScriptedScheduler {
    pub fn new(exit_codes: &[(&str, i32)]) -> Self {
        Self {
            exit_codes: exit_codes
                .iter()
                .map(|(name, code)| (name.to_string(), *code))
                .collect(),
            ..Self::default()
        }
    }

    /// Launching step `name` fails before the job starts.
    pub fn failing_launch(mut self, name: &str) -> Self {
        self.launch_failures.insert(name.to_string());
        self
    }

    /// Script paths submitted so far, in order.
    pub fn invoked(&self) -> Vec<PathBuf> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for ScriptedScheduler {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_blocking(&self, step: &CompiledStep) -> Result<i32, SchedulerError> {
        if self.launch_failures.contains(&step.name) {
            return Err(SchedulerError::Spawn {
                program: "sbatch".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "sbatch not found"),
            });
        }
        self.invoked.lock().unwrap().push(step.script_path.clone());
        Ok(self.exit_codes.get(&step.name).copied().unwrap_or(0))
    }
}
