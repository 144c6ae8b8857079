//! Integration tests for the poll cycle: trigger detection, build, status
//! reporting and run-log persistence, wired through in-memory fakes.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use superci_core::fakes::{FakeCheckout, FakeHosting, ScriptedScheduler};
use superci_core::{
    BuildPipeline, BuildStepSpec, Comment, Commit, CommitState, EmptyStepsPolicy, PullRequest,
    StatusReporter, StepCompiler, StepRunner, StepSource, TriggerScanner, TriggerState,
    WorkspaceManager, WorkspacePolicy,
};
use superci_state::fakes::MemoryRunLedger;
use superci_state::{FileRunLedger, LedgerLookup, RepoId, RunLedger};

const SHA: &str = "abcdef1234567890abcdef1234567890abcdef12";

fn repo() -> RepoId {
    RepoId::new("acme", "armory")
}

fn committed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap()
}

fn pull(number: u64, sha: &str) -> (PullRequest, Commit) {
    (
        PullRequest {
            number,
            head_ref: format!("feature/{number}"),
            head_sha: sha.to_string(),
            clone_url: Some("https://github.com/acme/armory.git".to_string()),
            html_url: Some(format!("https://github.com/acme/armory/pull/{number}")),
            created_at: committed_at() - Duration::hours(1),
        },
        Commit {
            sha: sha.to_string(),
            committed_at: committed_at(),
        },
    )
}

fn trigger_comment(id: u64, created_at: DateTime<Utc>) -> Comment {
    Comment {
        id,
        author: "maintainer".to_string(),
        body: "/superci".to_string(),
        created_at,
    }
}

fn two_steps() -> Vec<BuildStepSpec> {
    vec![
        BuildStepSpec::new("build")
            .option("--time=00:10:00")
            .module("gcc/12")
            .env("CC", "gcc")
            .command("make"),
        BuildStepSpec::new("test").command("make check"),
    ]
}

struct Harness {
    hosting: Arc<FakeHosting>,
    ledger: Arc<dyn RunLedger>,
    scheduler: Arc<ScriptedScheduler>,
    scanner: TriggerScanner,
}

struct Setup {
    checkout: FakeCheckout,
    step_source: StepSource,
    empty_steps: EmptyStepsPolicy,
    scheduler: ScriptedScheduler,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            checkout: FakeCheckout::new(),
            step_source: StepSource::Embedded(two_steps()),
            empty_steps: EmptyStepsPolicy::Reject,
            scheduler: ScriptedScheduler::new(&[]),
        }
    }
}

fn harness(
    workspace_root: &Path,
    hosting: FakeHosting,
    ledger: Arc<dyn RunLedger>,
    setup: Setup,
) -> Harness {
    let hosting = Arc::new(hosting);
    let scheduler = Arc::new(setup.scheduler);
    let pipeline = BuildPipeline::new(
        repo(),
        WorkspaceManager::new(workspace_root, WorkspacePolicy::Reuse),
        Arc::new(setup.checkout),
        setup.step_source,
        StepCompiler::new(setup.empty_steps),
        StepRunner::new(scheduler.clone()),
        StatusReporter::new(hosting.clone(), "superci/armory"),
    );
    let scanner = TriggerScanner::new("main", "/superci", hosting.clone(), ledger.clone(), pipeline);
    Harness {
        hosting,
        ledger,
        scheduler,
        scanner,
    }
}

/// Test: triggered two-step build reports pending then success and logs one entry
#[tokio::test]
async fn test_end_to_end_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup::default(),
    );

    let summary = h.scanner.poll().await.unwrap();

    assert_eq!(summary.pulls, 1);
    assert_eq!(summary.triggered, 1);
    assert_eq!(summary.failed_builds, 0);
    assert_eq!(h.hosting.states(), vec![CommitState::Pending, CommitState::Success]);
    assert!(h.hosting.statuses().iter().all(|(sha, _)| sha == SHA));

    let entries = h.ledger.entries(&repo()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].commit, SHA);
    assert_eq!(entries[0].branch, "feature/1");
    assert_eq!(entries[0].aggregate_status, 0);

    let ws = dir.path().join("acme").join("armory").join("abcdef1");
    assert_eq!(
        entries[0].log_files,
        vec![ws.join("step-000.out"), ws.join("step-001.out")]
    );
    let script = std::fs::read_to_string(ws.join("step-000.sh")).unwrap();
    assert!(script.starts_with("#!/bin/bash\n#SBATCH --time=00:10:00\n"));
    assert!(script.contains("module load gcc/12"));
    assert_eq!(
        h.scheduler.invoked(),
        vec![ws.join("step-000.sh"), ws.join("step-001.sh")]
    );
}

/// Test: a second poll over the same state builds nothing
#[tokio::test]
async fn test_poll_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup::default(),
    );

    h.scanner.poll().await.unwrap();
    let second = h.scanner.poll().await.unwrap();

    assert_eq!(second.triggered, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(h.hosting.statuses().len(), 2);
    assert_eq!(h.ledger.entries(&repo()).await.unwrap().len(), 1);
    assert_eq!(h.scheduler.invoked().len(), 2);
}

/// Test: comments at or before the commit time never trigger
#[tokio::test]
async fn test_stale_comments_do_not_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr.clone(), commit)
        .with_comment(1, trigger_comment(10, committed_at() - Duration::minutes(5)))
        .with_comment(1, trigger_comment(11, committed_at()));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup::default(),
    );

    assert_eq!(
        h.scanner.process_pull(&pr).await.unwrap(),
        TriggerState::AwaitingTrigger
    );
    assert!(h.hosting.statuses().is_empty());
    assert!(h.ledger.entries(&repo()).await.unwrap().is_empty());

    // A later comment on the same commit does trigger.
    h.hosting
        .push_comment(1, trigger_comment(12, committed_at() + Duration::seconds(1)));
    assert_eq!(
        h.scanner.process_pull(&pr).await.unwrap(),
        TriggerState::Triggered { aggregate_status: 0 }
    );
}

/// Test: fail-fast keeps later log paths reserved and sums exit codes
#[tokio::test]
async fn test_fail_fast_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup {
            step_source: StepSource::Embedded(vec![
                BuildStepSpec::new("A").command("true"),
                BuildStepSpec::new("B").command("exit 3"),
                BuildStepSpec::new("C").command("true"),
            ]),
            scheduler: ScriptedScheduler::new(&[("A", 0), ("B", 3), ("C", 0)]),
            ..Setup::default()
        },
    );

    let summary = h.scanner.poll().await.unwrap();

    assert_eq!(summary.failed_builds, 1);
    assert_eq!(h.scheduler.invoked().len(), 2);
    let entries = h.ledger.entries(&repo()).await.unwrap();
    assert_eq!(entries[0].aggregate_status, 3);
    assert_eq!(entries[0].log_files.len(), 3);
    let statuses = h.hosting.statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[1].1.state, CommitState::Failure);
}

/// Test: a missing build file is a configuration error with one failure report
#[tokio::test]
async fn test_missing_build_file() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup {
            step_source: StepSource::Repository(".superci.yml".into()),
            ..Setup::default()
        },
    );

    h.scanner.poll().await.unwrap();

    assert!(h.scheduler.invoked().is_empty());
    let failures: Vec<_> = h
        .hosting
        .statuses()
        .into_iter()
        .filter(|(_, s)| s.state == CommitState::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.description, "SuperCI found no build configuration");

    let entries = h.ledger.entries(&repo()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].aggregate_status, -1);
    assert!(entries[0].log_files.is_empty());
}

/// Test: steps read from the checked-out tree
#[tokio::test]
async fn test_repository_build_file() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let steps_yaml = "steps:\n  - name: unit\n    commands:\n      - cargo test\n";
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup {
            checkout: FakeCheckout::new().with_file("ci/superci.yml", steps_yaml),
            step_source: StepSource::Repository("ci/superci.yml".into()),
            ..Setup::default()
        },
    );

    let summary = h.scanner.poll().await.unwrap();

    assert_eq!(summary.triggered, 1);
    assert_eq!(h.scheduler.invoked().len(), 1);
    assert_eq!(h.hosting.states(), vec![CommitState::Pending, CommitState::Success]);
}

/// Test: a failed clone surfaces as a failure status, never silent success
#[tokio::test]
async fn test_clone_failure_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup {
            checkout: FakeCheckout::failing(),
            ..Setup::default()
        },
    );

    let summary = h.scanner.poll().await.unwrap();

    assert_eq!(summary.failed_builds, 1);
    assert_eq!(h.hosting.states(), vec![CommitState::Pending, CommitState::Failure]);
    assert!(h.scheduler.invoked().is_empty());
    assert_eq!(
        h.ledger.entries(&repo()).await.unwrap()[0].aggregate_status,
        -1
    );
}

/// Test: empty step list under both policies
#[tokio::test]
async fn test_empty_steps_policies() {
    for (policy, expected_status, expected_state) in [
        (EmptyStepsPolicy::Reject, -1, CommitState::Failure),
        (EmptyStepsPolicy::Succeed, 0, CommitState::Success),
    ] {
        let dir = tempfile::tempdir().unwrap();
        let (pr, commit) = pull(1, SHA);
        let hosting = FakeHosting::new()
            .with_pull(pr, commit)
            .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
        let h = harness(
            dir.path(),
            hosting,
            Arc::new(MemoryRunLedger::new()),
            Setup {
                step_source: StepSource::Embedded(Vec::new()),
                empty_steps: policy,
                ..Setup::default()
            },
        );

        h.scanner.poll().await.unwrap();

        assert_eq!(h.hosting.states(), vec![CommitState::Pending, expected_state]);
        let entries = h.ledger.entries(&repo()).await.unwrap();
        assert_eq!(entries[0].aggregate_status, expected_status, "{policy:?}");
    }
}

/// Test: one broken pull request does not stop the cycle
#[tokio::test]
async fn test_per_pull_errors_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let (pr1, commit1) = pull(1, "1111111aaaaaaa");
    let (pr2, commit2) = pull(2, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr1, commit1)
        .with_pull(pr2, commit2)
        .failing_comments(1)
        .with_comment(2, trigger_comment(20, committed_at() + Duration::minutes(1)));
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup::default(),
    );

    let summary = h.scanner.poll().await.unwrap();

    assert_eq!(summary.pulls, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.triggered, 1);
    assert_eq!(
        h.ledger.is_tested(&repo(), SHA).await.unwrap(),
        LedgerLookup::Tested
    );
}

/// Test: failing to list pull requests fails the cycle
#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeHosting::new().failing_listing(),
        Arc::new(MemoryRunLedger::new()),
        Setup::default(),
    );
    assert!(h.scanner.poll().await.is_err());
}

/// Test: status endpoint failures never block the ledger entry
#[tokio::test]
async fn test_status_failures_still_logged() {
    let dir = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)))
        .failing_statuses();
    let h = harness(
        dir.path(),
        hosting,
        Arc::new(MemoryRunLedger::new()),
        Setup::default(),
    );

    let summary = h.scanner.poll().await.unwrap();

    assert_eq!(summary.triggered, 1);
    assert_eq!(h.ledger.entries(&repo()).await.unwrap().len(), 1);
}

/// Test: a lease held by another poller defers the pull request
#[tokio::test]
async fn test_held_lease_defers() {
    let dir = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    let (pr, commit) = pull(1, SHA);
    let hosting = FakeHosting::new()
        .with_pull(pr, commit)
        .with_comment(1, trigger_comment(10, committed_at() + Duration::minutes(5)));
    let ledger = Arc::new(FileRunLedger::new(logs.path()));
    let h = harness(dir.path(), hosting, ledger.clone(), Setup::default());

    let other_poller = ledger.lease(&repo()).await.unwrap();
    let summary = h.scanner.poll().await.unwrap();
    assert_eq!(summary.deferred, 1);
    assert!(h.hosting.statuses().is_empty());

    drop(other_poller);
    let summary = h.scanner.poll().await.unwrap();
    assert_eq!(summary.triggered, 1);
    assert!(ledger.ledger_path(&repo()).exists());
}
