//! Hosting-service seam: pull requests, commits, comments and commit statuses.
//!
//! Implementations are scoped to one repository. The production client lives
//! in `superci-github`; `fakes::FakeHosting` serves tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    /// Source branch name
    pub head_ref: String,
    pub head_sha: String,
    /// Clone URL of the head repository (differs from the base for forks)
    pub clone_url: Option<String>,
    pub html_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The most recent commit on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    /// Committer timestamp; trigger comments must be strictly later.
    pub committed_at: DateTime<Utc>,
}

/// An issue comment on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Commit status state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a commit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub state: CommitState,
    pub description: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// Errors from the hosting service.
#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("pull request #{0} has no commits")]
    NoCommits(u64),
}

/// Operations the trigger pipeline needs from the hosting service.
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Open pull requests targeting `base`, oldest first.
    async fn list_open_pulls(&self, base: &str) -> Result<Vec<PullRequest>, HostingError>;

    /// The last commit of a pull request.
    async fn latest_commit(&self, pr: &PullRequest) -> Result<Commit, HostingError>;

    /// Issue comments of a pull request in arrival order.
    async fn comments(&self, pr: &PullRequest) -> Result<Vec<Comment>, HostingError>;

    /// Create a commit status.
    async fn create_status(&self, sha: &str, status: &StatusUpdate) -> Result<(), HostingError>;
}
