//! `HostingService` over the GitHub REST API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use superci_core::{
    Comment, Commit, HostingError, HostingService, PullRequest, RepoId, StatusUpdate,
};
use tracing::debug;

use crate::wire::{ApiErrorJson, CommentJson, CommitJson, PullJson};

/// REST API version requested on every call.
pub const API_VERSION: &str = "2022-11-28";

/// Page size for list endpoints (the API maximum).
pub const PER_PAGE: usize = 100;

fn http_error(err: reqwest::Error) -> HostingError {
    HostingError::Http(err.to_string())
}

/// GitHub client scoped to one repository.
pub struct GitHubClient {
    api_url: String,
    repo: RepoId,
    http_client: reqwest::Client,
}

impl GitHubClient {
    /// Create a client for `repo` authenticating with `token`.
    pub fn new(api_url: &str, token: &str, repo: RepoId) -> Result<Self, HostingError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| HostingError::Http("access token contains invalid characters".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("superci/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(http_error)?;

        Ok(GitHubClient {
            api_url: api_url.trim_end_matches('/').to_string(),
            repo,
            http_client,
        })
    }

    pub fn repository(&self) -> &RepoId {
        &self.repo
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_url, self.repo.owner, self.repo.name, path
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, HostingError> {
        let response = request.send().await.map_err(http_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorJson>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(HostingError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Fetch every page of a list endpoint, in API order.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, HostingError> {
        let url = self.repo_url(path);
        let per_page = PER_PAGE.to_string();
        let mut items = Vec::new();

        for page in 1.. {
            let page_str = page.to_string();
            let request = self
                .http_client
                .get(&url)
                .query(query)
                .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())]);
            let batch: Vec<T> = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(|e| HostingError::Decode(e.to_string()))?;

            let len = batch.len();
            items.extend(batch);
            debug!(path = %path, page = page, items = len, "Fetched page");
            if len < PER_PAGE {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl HostingService for GitHubClient {
    async fn list_open_pulls(&self, base: &str) -> Result<Vec<PullRequest>, HostingError> {
        let pulls: Vec<PullJson> = self
            .get_all(
                "pulls",
                &[
                    ("state", "open"),
                    ("base", base),
                    ("sort", "created"),
                    ("direction", "asc"),
                ],
            )
            .await?;
        Ok(pulls.into_iter().map(PullRequest::from).collect())
    }

    async fn latest_commit(&self, pr: &PullRequest) -> Result<Commit, HostingError> {
        // The pull commit listing stops at 250 entries; the head ref does not.
        if !pr.head_sha.is_empty() {
            let request = self
                .http_client
                .get(self.repo_url(&format!("commits/{}", pr.head_sha)));
            let commit: CommitJson = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(|e| HostingError::Decode(e.to_string()))?;
            return commit.try_into();
        }

        let commits: Vec<CommitJson> = self
            .get_all(&format!("pulls/{}/commits", pr.number), &[])
            .await?;
        commits
            .into_iter()
            .last()
            .ok_or(HostingError::NoCommits(pr.number))?
            .try_into()
    }

    async fn comments(&self, pr: &PullRequest) -> Result<Vec<Comment>, HostingError> {
        let comments: Vec<CommentJson> = self
            .get_all(&format!("issues/{}/comments", pr.number), &[])
            .await?;
        Ok(comments.into_iter().map(Comment::from).collect())
    }

    async fn create_status(&self, sha: &str, status: &StatusUpdate) -> Result<(), HostingError> {
        let request = self
            .http_client
            .post(self.repo_url(&format!("statuses/{sha}")))
            .json(status);
        self.send(request).await?;
        debug!(sha = %sha, state = %status.state, context = %status.context, "Status created");
        Ok(())
    }
}
