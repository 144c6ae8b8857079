//! Structured lifecycle events for poll cycles and builds.
//!
//! Every event carries an `event` field so JSON logs (`--json`) can be
//! filtered without parsing messages.

use tracing::{info, warn};

use crate::hosting::CommitState;

/// RAII guard that tags everything logged while handling one pull request.
pub struct PullSpan {
    _span: tracing::span::EnteredSpan,
}

impl PullSpan {
    pub fn enter(repository: &str, number: u64) -> Self {
        let span = tracing::info_span!("superci.pull", repository = %repository, pr = number);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_poll_started(repository: &str, base_branch: &str) {
    info!(event = "poll.started", repository = %repository, base = %base_branch);
}

pub fn emit_poll_finished(repository: &str, pulls: usize, triggered: usize, errors: usize) {
    info!(
        event = "poll.finished",
        repository = %repository,
        pulls = pulls,
        triggered = triggered,
        errors = errors,
    );
}

/// A trigger comment was accepted for `sha`.
pub fn emit_trigger_detected(sha: &str, comment_id: u64, author: &str) {
    info!(event = "trigger.detected", sha = %sha, comment_id = comment_id, author = %author);
}

pub fn emit_build_finished(sha: &str, aggregate_status: i64, steps_run: usize, duration_ms: u64) {
    info!(
        event = "build.finished",
        sha = %sha,
        aggregate_status = aggregate_status,
        steps_run = steps_run,
        duration_ms = duration_ms,
    );
}

pub fn emit_status_reported(sha: &str, state: CommitState) {
    info!(event = "status.reported", sha = %sha, state = %state);
}

/// Status report failed. Never fatal.
pub fn emit_status_error(sha: &str, state: CommitState, error: &dyn std::fmt::Display) {
    warn!(event = "status.error", sha = %sha, state = %state, error = %error);
}

pub fn emit_ledger_error(sha: &str, error: &dyn std::fmt::Display) {
    warn!(event = "ledger.error", sha = %sha, error = %error);
}
