//! Build orchestration for one triggered commit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use superci_state::RepoId;
use tracing::{error, info};

use crate::checkout::{CheckoutRequest, SourceCheckout};
use crate::compiler::{CompiledStep, StepCompiler};
use crate::error::PipelineError;
use crate::hosting::{Commit, CommitState, PullRequest};
use crate::obs;
use crate::reporter::StatusReporter;
use crate::runner::{BuildOutcome, StepRunner};
use crate::step::StepSource;
use crate::workspace::{build_id, WorkspaceManager};

/// Runs a triggered build end to end: pending status, workspace, checkout,
/// step compilation, fail-fast execution, terminal status.
pub struct BuildPipeline {
    repo: RepoId,
    workspaces: WorkspaceManager,
    checkout: Arc<dyn SourceCheckout>,
    step_source: StepSource,
    compiler: StepCompiler,
    runner: StepRunner,
    reporter: StatusReporter,
}

impl BuildPipeline {
    pub fn new(
        repo: RepoId,
        workspaces: WorkspaceManager,
        checkout: Arc<dyn SourceCheckout>,
        step_source: StepSource,
        compiler: StepCompiler,
        runner: StepRunner,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            repo,
            workspaces,
            checkout,
            step_source,
            compiler,
            runner,
            reporter,
        }
    }

    pub fn repository(&self) -> &RepoId {
        &self.repo
    }

    /// Build `commit` of `pr`.
    ///
    /// Posts exactly one `pending` and one terminal status. Anything that
    /// stops the build before its first step yields aggregate status -1.
    pub async fn run(&self, pr: &PullRequest, commit: &Commit) -> BuildOutcome {
        let started = Instant::now();
        let pull_url = pr.html_url.as_deref();

        self.reporter
            .report(&commit.sha, CommitState::Pending, "SuperCI build started", pull_url)
            .await;

        let steps = match self.prepare(pr, commit).await {
            Ok(steps) => steps,
            Err(e) => {
                error!(pr = pr.number, sha = %commit.sha, error = %e, "Build could not start");
                self.reporter
                    .report(&commit.sha, CommitState::Failure, &e.status_description(), pull_url)
                    .await;
                let outcome = BuildOutcome::configuration_error();
                obs::emit_build_finished(
                    &commit.sha,
                    outcome.aggregate_status,
                    0,
                    started.elapsed().as_millis() as u64,
                );
                return outcome;
            }
        };

        let outcome = self.runner.run(&steps).await;

        let (state, description) = if outcome.succeeded() {
            (CommitState::Success, "SuperCI build passed".to_string())
        } else {
            match outcome.failed_step() {
                Some(step) => (
                    CommitState::Failure,
                    format!(
                        "SuperCI step '{}' failed with exit code {}",
                        step.name, step.exit_code
                    ),
                ),
                None => (CommitState::Failure, "SuperCI build failed".to_string()),
            }
        };
        self.reporter
            .report(&commit.sha, state, &description, pull_url)
            .await;

        obs::emit_build_finished(
            &commit.sha,
            outcome.aggregate_status,
            outcome.results.len(),
            started.elapsed().as_millis() as u64,
        );
        outcome
    }

    /// Everything up to (not including) running the first step.
    async fn prepare(
        &self,
        pr: &PullRequest,
        commit: &Commit,
    ) -> Result<Vec<CompiledStep>, PipelineError> {
        let id = build_id(&commit.sha)?;
        let workspace = self.workspaces.create_workspace(&self.repo, &id)?;

        let clone_url = self.clone_url(pr);
        self.checkout
            .checkout(&CheckoutRequest {
                clone_url: &clone_url,
                branch: &pr.head_ref,
                commit: &commit.sha,
                dest: &workspace,
            })
            .await?;
        info!(build_id = %id, workspace = %workspace.display(), "Source checked out");

        let specs = self.step_source.resolve(&workspace)?;
        Ok(self.compiler.compile(&specs, &workspace)?)
    }

    fn clone_url(&self, pr: &PullRequest) -> String {
        pr.clone_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}.git", self.repo))
    }

    /// Workspace path a commit builds in.
    pub fn workspace_for(&self, sha: &str) -> Option<PathBuf> {
        build_id(sha)
            .ok()
            .map(|id| self.workspaces.workspace_path(&self.repo, &id))
    }
}
