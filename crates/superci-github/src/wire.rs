//! GitHub REST response payloads and their mapping onto hosting types.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use superci_core::{Comment, Commit, HostingError, PullRequest};

#[derive(Debug, Deserialize)]
pub(crate) struct PullJson {
    pub number: u64,
    pub head: HeadJson,
    #[serde(default)]
    pub html_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HeadJson {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    /// Null when the fork was deleted.
    #[serde(default)]
    pub repo: Option<RepoJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepoJson {
    pub clone_url: String,
}

impl From<PullJson> for PullRequest {
    fn from(pull: PullJson) -> Self {
        PullRequest {
            number: pull.number,
            head_ref: pull.head.git_ref,
            head_sha: pull.head.sha,
            clone_url: pull.head.repo.map(|r| r.clone_url),
            html_url: pull.html_url,
            created_at: pull.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitJson {
    pub sha: String,
    pub commit: GitCommitJson,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitCommitJson {
    #[serde(default)]
    pub committer: Option<SignatureJson>,
    #[serde(default)]
    pub author: Option<SignatureJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignatureJson {
    pub date: DateTime<Utc>,
}

impl TryFrom<CommitJson> for Commit {
    type Error = HostingError;

    /// Uses the committer date, falling back to the author date.
    fn try_from(commit: CommitJson) -> Result<Self, Self::Error> {
        let committed_at = commit
            .commit
            .committer
            .or(commit.commit.author)
            .map(|s| s.date)
            .ok_or_else(|| HostingError::Decode(format!("commit {} has no date", commit.sha)))?;
        Ok(Commit {
            sha: commit.sha,
            committed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentJson {
    pub id: u64,
    #[serde(default)]
    pub user: Option<UserJson>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserJson {
    pub login: String,
}

impl From<CommentJson> for Comment {
    fn from(comment: CommentJson) -> Self {
        Comment {
            id: comment.id,
            author: comment.user.map(|u| u.login).unwrap_or_default(),
            body: comment.body.unwrap_or_default(),
            created_at: comment.created_at,
        }
    }
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorJson {
    pub message: String,
}
