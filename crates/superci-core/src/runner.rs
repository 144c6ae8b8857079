//! Fail-fast sequential execution of compiled steps.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::compiler::CompiledStep;
use crate::error::SchedulerError;

/// A batch system that runs one script and blocks until the job finishes.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Short name for logs (`slurm`, `local`, ...).
    fn name(&self) -> &str;

    /// Submit `step` and wait for completion, returning the job's exit code.
    async fn run_blocking(&self, step: &CompiledStep) -> Result<i32, SchedulerError>;
}

/// Exit code recorded when the scheduler itself could not be invoked.
pub const SCHEDULER_FAILURE_EXIT_CODE: i32 = -1;

/// Result of a step that actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of one triggered build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Sum of absolute exit codes of the steps that ran; -1 for a configuration error.
    pub aggregate_status: i64,
    /// Steps that ran, in order. Steps skipped by fail-fast are absent.
    pub results: Vec<StepResult>,
    /// Stdout log of every compiled step, ran or not.
    pub log_files: Vec<PathBuf>,
}

impl BuildOutcome {
    /// Aggregate status reserved for "configuration error, no steps ran".
    pub const CONFIGURATION_ERROR: i64 = -1;

    pub fn configuration_error() -> Self {
        Self {
            aggregate_status: Self::CONFIGURATION_ERROR,
            results: Vec::new(),
            log_files: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.aggregate_status == 0
    }

    pub fn is_configuration_error(&self) -> bool {
        self.aggregate_status == Self::CONFIGURATION_ERROR
    }

    /// The step that stopped the build, if any.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| !r.passed())
    }
}

/// Runs compiled steps one after another through a `Scheduler`.
#[derive(Clone)]
pub struct StepRunner {
    scheduler: Arc<dyn Scheduler>,
}

impl StepRunner {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Execute `steps` in order, stopping at the first non-zero exit.
    ///
    /// An empty list is a vacuous success; whether that is acceptable is
    /// decided by the compiler's `EmptyStepsPolicy`.
    pub async fn run(&self, steps: &[CompiledStep]) -> BuildOutcome {
        if steps.len() > 1 {
            warn!(
                steps = steps.len(),
                "Steps run strictly in declared order; no inter-step dependencies are honored"
            );
        }

        let log_files = steps.iter().map(|s| s.log_path.clone()).collect();
        let mut results = Vec::new();
        let mut aggregate_status: i64 = 0;

        for (position, step) in steps.iter().enumerate() {
            info!(
                step = %step.name,
                index = step.index,
                scheduler = self.scheduler.name(),
                script = %step.script_path.display(),
                "Executing step"
            );

            let exit_code = match self.scheduler.run_blocking(step).await {
                Ok(code) => code,
                Err(e) => {
                    error!(step = %step.name, error = %e, "Scheduler invocation failed");
                    SCHEDULER_FAILURE_EXIT_CODE
                }
            };

            aggregate_status += i64::from(exit_code).abs();
            results.push(StepResult {
                name: step.name.clone(),
                exit_code,
            });

            if exit_code != 0 {
                let skipped = steps.len() - position - 1;
                warn!(
                    step = %step.name,
                    exit_code = exit_code,
                    skipped = skipped,
                    "Step failed; skipping remaining steps"
                );
                break;
            }
            info!(step = %step.name, "Step passed");
        }

        BuildOutcome {
            aggregate_status,
            results,
            log_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedScheduler;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;

    /// Shared buffer collecting formatted log output.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    /// Run `names` through a passing scheduler and return the WARN output.
    async fn warnings_for(names: &[&str]) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let scheduler = Arc::new(ScriptedScheduler::new(&[]));
        StepRunner::new(scheduler).run(&compiled(names)).await;
        captured.text()
    }

    fn compiled(names: &[&str]) -> Vec<CompiledStep> {
        let ws = Path::new("/ws");
        names
            .iter()
            .enumerate()
            .map(|(index, name)| CompiledStep {
                index,
                name: name.to_string(),
                script_path: ws.join(format!("step-{index:03}.sh")),
                log_path: ws.join(format!("step-{index:03}.out")),
                err_path: ws.join(format!("step-{index:03}.err")),
            })
            .collect()
    }

    #[tokio::test]
    async fn all_steps_pass() {
        let scheduler = Arc::new(ScriptedScheduler::new(&[("A", 0), ("B", 0), ("C", 0)]));
        let outcome = StepRunner::new(scheduler.clone())
            .run(&compiled(&["A", "B", "C"]))
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.aggregate_status, 0);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(scheduler.invoked().len(), 3);
    }

    #[tokio::test]
    async fn fail_fast_skips_later_steps() {
        let scheduler = Arc::new(ScriptedScheduler::new(&[("A", 0), ("B", 3), ("C", 0)]));
        let steps = compiled(&["A", "B", "C"]);
        let outcome = StepRunner::new(scheduler.clone()).run(&steps).await;

        assert_eq!(
            outcome.results,
            vec![
                StepResult {
                    name: "A".to_string(),
                    exit_code: 0
                },
                StepResult {
                    name: "B".to_string(),
                    exit_code: 3
                },
            ]
        );
        assert_eq!(outcome.aggregate_status, 3);
        assert_eq!(outcome.log_files.len(), 3);
        assert_eq!(outcome.log_files[2], steps[2].log_path);
        assert_eq!(scheduler.invoked(), vec![steps[0].script_path.clone(), steps[1].script_path.clone()]);
        assert_eq!(outcome.failed_step().map(|r| r.name.as_str()), Some("B"));
    }

    #[tokio::test]
    async fn negative_exit_codes_count_by_magnitude() {
        let scheduler = Arc::new(ScriptedScheduler::new(&[("A", -4)]));
        let outcome = StepRunner::new(scheduler).run(&compiled(&["A"])).await;
        assert_eq!(outcome.aggregate_status, 4);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn first_step_failure_never_runs_second() {
        let scheduler = Arc::new(ScriptedScheduler::new(&[("A", 2), ("B", -1)]));
        let outcome = StepRunner::new(scheduler.clone())
            .run(&compiled(&["A", "B"]))
            .await;
        assert_eq!(outcome.aggregate_status, 2);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(scheduler.invoked().len(), 1);
    }

    #[tokio::test]
    async fn scheduler_error_is_a_failed_step() {
        let scheduler = Arc::new(ScriptedScheduler::new(&[("B", 0)]).failing_launch("A"));
        let outcome = StepRunner::new(scheduler).run(&compiled(&["A", "B"])).await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].exit_code, SCHEDULER_FAILURE_EXIT_CODE);
        assert_eq!(outcome.aggregate_status, 1);
    }

    #[tokio::test]
    async fn empty_list_is_vacuous_success() {
        let scheduler = Arc::new(ScriptedScheduler::new(&[]));
        let outcome = StepRunner::new(scheduler).run(&[]).await;
        assert_eq!(outcome.aggregate_status, 0);
        assert!(outcome.results.is_empty());
        assert!(outcome.log_files.is_empty());
    }

    #[tokio::test]
    async fn multi_step_build_warns_about_sequential_order() {
        let out = warnings_for(&["A", "B"]).await;
        assert!(out.contains("WARN"));
        assert!(out.contains("declared order"));
        assert!(out.contains("steps=2"));
    }

    #[tokio::test]
    async fn single_or_no_step_does_not_warn_about_order() {
        assert!(!warnings_for(&["A"]).await.contains("declared order"));
        assert!(!warnings_for(&[]).await.contains("declared order"));
    }

    #[tokio::test]
    async fn failure_with_index_past_slice_end_still_stops() {
        let mut steps = compiled(&["A", "B"]);
        steps[0].index = 5;
        let scheduler = Arc::new(ScriptedScheduler::new(&[("A", 1)]));
        let outcome = StepRunner::new(scheduler.clone()).run(&steps).await;

        assert_eq!(outcome.aggregate_status, 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(scheduler.invoked().len(), 1);
    }

    #[test]
    fn configuration_error_outcome() {
        let outcome = BuildOutcome::configuration_error();
        assert!(outcome.is_configuration_error());
        assert!(!outcome.succeeded());
        assert!(outcome.results.is_empty());
    }
}
