//! Best-effort commit status reporting.

use std::sync::Arc;

use crate::hosting::{CommitState, HostingService, StatusUpdate};
use crate::obs;

/// Maximum description length the hosting service accepts.
pub const MAX_DESCRIPTION_CHARS: usize = 140;

/// Posts commit statuses under a fixed context.
///
/// Reporting failures are logged and swallowed: a lost status must never
/// abort a build or prevent its ledger entry.
#[derive(Clone)]
pub struct StatusReporter {
    hosting: Arc<dyn HostingService>,
    context: String,
    target_url: Option<String>,
}

impl StatusReporter {
    pub fn new(hosting: Arc<dyn HostingService>, context: impl Into<String>) -> Self {
        Self {
            hosting,
            context: context.into(),
            target_url: None,
        }
    }

    /// Link attached to every status, overriding the pull request's own page.
    pub fn with_target_url(mut self, url: Option<String>) -> Self {
        self.target_url = url;
        self
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Post `state` for `sha`. Returns whether the hosting service accepted it.
    ///
    /// `pull_url` is linked when no target URL is configured.
    pub async fn report(
        &self,
        sha: &str,
        state: CommitState,
        description: &str,
        pull_url: Option<&str>,
    ) -> bool {
        let update = StatusUpdate {
            state,
            description: truncate(description, MAX_DESCRIPTION_CHARS),
            context: self.context.clone(),
            target_url: self
                .target_url
                .clone()
                .or_else(|| pull_url.map(str::to_string)),
        };

        match self.hosting.create_status(sha, &update).await {
            Ok(()) => {
                obs::emit_status_reported(sha, state);
                true
            }
            Err(e) => {
                obs::emit_status_error(sha, state, &e);
                false
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
