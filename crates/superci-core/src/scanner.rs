//! Trigger detection and the per-repository poll cycle.

use std::sync::Arc;

use chrono::Utc;
use superci_state::{RepoId, RunLedger, RunLogEntry, StorageError};
use tracing::{debug, error, info, warn};

use crate::error::ScanError;
use crate::hosting::{Comment, Commit, HostingError, HostingService, PullRequest};
use crate::obs;
use crate::pipeline::BuildPipeline;

/// What the scanner decided for one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// The latest commit already has a ledger entry.
    SkipAlreadyTested,
    /// No trigger comment newer than the latest commit.
    AwaitingTrigger,
    /// A build ran with the given aggregate status.
    Triggered { aggregate_status: i64 },
    /// Another poller holds the ledger lease; retried next cycle.
    Deferred,
}

/// Counts of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub pulls: usize,
    pub skipped: usize,
    pub awaiting: usize,
    pub triggered: usize,
    /// Triggered builds with a non-zero aggregate status.
    pub failed_builds: usize,
    pub deferred: usize,
    /// Pull requests abandoned on a hosting or ledger error.
    pub errors: usize,
}

impl PollSummary {
    fn record(&mut self, state: TriggerState) {
        match state {
            TriggerState::SkipAlreadyTested => self.skipped += 1,
            TriggerState::AwaitingTrigger => self.awaiting += 1,
            TriggerState::Triggered { aggregate_status } => {
                self.triggered += 1;
                if aggregate_status != 0 {
                    self.failed_builds += 1;
                }
            }
            TriggerState::Deferred => self.deferred += 1,
        }
    }
}

/// First comment whose body is exactly `token` and which was posted
/// strictly after `commit`.
///
/// A comment at the same instant as the commit does not count.
pub fn find_trigger<'a>(comments: &'a [Comment], commit: &Commit, token: &str) -> Option<&'a Comment> {
    comments
        .iter()
        .find(|c| c.body == token && c.created_at > commit.committed_at)
}

/// Walks the open pull requests of one repository and builds triggered commits.
pub struct TriggerScanner {
    repo: RepoId,
    base_branch: String,
    trigger: String,
    hosting: Arc<dyn HostingService>,
    ledger: Arc<dyn RunLedger>,
    pipeline: BuildPipeline,
}

impl TriggerScanner {
    pub fn new(
        base_branch: impl Into<String>,
        trigger: impl Into<String>,
        hosting: Arc<dyn HostingService>,
        ledger: Arc<dyn RunLedger>,
        pipeline: BuildPipeline,
    ) -> Self {
        Self {
            repo: pipeline.repository().clone(),
            base_branch: base_branch.into(),
            trigger: trigger.into(),
            hosting,
            ledger,
            pipeline,
        }
    }

    /// One poll cycle over every open pull request targeting the base branch.
    ///
    /// Only failing to list pull requests is fatal; per-PR errors are
    /// logged, counted and skipped.
    pub async fn poll(&self) -> Result<PollSummary, HostingError> {
        let repository = self.repo.to_string();
        obs::emit_poll_started(&repository, &self.base_branch);

        let pulls = self.hosting.list_open_pulls(&self.base_branch).await?;
        info!(count = pulls.len(), "Open pull requests");

        let mut summary = PollSummary {
            pulls: pulls.len(),
            ..PollSummary::default()
        };

        for pr in &pulls {
            let _span = obs::PullSpan::enter(&repository, pr.number);
            match self.process_pull(pr).await {
                Ok(state) => {
                    debug!(state = ?state, "Pull request processed");
                    summary.record(state);
                }
                Err(e) => {
                    error!(error = %e, "Failed to process pull request");
                    summary.errors += 1;
                }
            }
        }

        obs::emit_poll_finished(&repository, summary.pulls, summary.triggered, summary.errors);
        Ok(summary)
    }

    /// Decide and, if triggered, build one pull request.
    pub async fn process_pull(&self, pr: &PullRequest) -> Result<TriggerState, ScanError> {
        let commit = self.hosting.latest_commit(pr).await?;

        let _lease = match self.ledger.lease(&self.repo).await {
            Ok(lease) => lease,
            Err(StorageError::LeaseHeld {
                holder,
                acquired_at,
                ..
            }) => {
                warn!(
                    sha = %commit.sha,
                    holder = %holder,
                    acquired_at = %acquired_at,
                    "Ledger lease held elsewhere; deferring"
                );
                return Ok(TriggerState::Deferred);
            }
            Err(e) => return Err(e.into()),
        };

        let lookup = self.ledger.is_tested(&self.repo, &commit.sha).await?;
        if !lookup.should_test() {
            debug!(sha = %commit.sha, "Commit already tested");
            return Ok(TriggerState::SkipAlreadyTested);
        }

        let comments = self.hosting.comments(pr).await?;
        let Some(trigger) = find_trigger(&comments, &commit, &self.trigger) else {
            debug!(sha = %commit.sha, comments = comments.len(), "No trigger comment");
            return Ok(TriggerState::AwaitingTrigger);
        };
        obs::emit_trigger_detected(&commit.sha, trigger.id, &trigger.author);

        let datetime = Utc::now();
        let outcome = self.pipeline.run(pr, &commit).await;

        let entry = RunLogEntry {
            branch: pr.head_ref.clone(),
            commit: commit.sha.clone(),
            datetime,
            aggregate_status: outcome.aggregate_status,
            log_files: outcome.log_files.clone(),
        };
        if let Err(e) = self.ledger.append(&self.repo, entry).await {
            obs::emit_ledger_error(&commit.sha, &e);
        }

        Ok(TriggerState::Triggered {
            aggregate_status: outcome.aggregate_status,
        })
    }
}
