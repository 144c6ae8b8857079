//! Scheduler backends.

use std::fs::File;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::compiler::CompiledStep;
use crate::config::SchedulerKind;
use crate::error::SchedulerError;
use crate::runner::{Scheduler, SCHEDULER_FAILURE_EXIT_CODE};

/// Build the scheduler selected in configuration.
pub fn from_kind(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Slurm => Box::new(SlurmScheduler::default()),
        SchedulerKind::Local => Box::new(LocalScheduler::default()),
    }
}

/// Slurm via `sbatch --wait`, which returns only once the job has finished
/// and exits with the job's exit code.
///
/// Job output goes where the script's `#SBATCH -o/-e` directives point.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    program: String,
}

impl SlurmScheduler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self::new("sbatch")
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    fn name(&self) -> &str {
        "slurm"
    }

    async fn run_blocking(&self, step: &CompiledStep) -> Result<i32, SchedulerError> {
        let mut command = Command::new(&self.program);
        command.arg("--wait").arg(&step.script_path);
        if let Some(dir) = step.script_path.parent() {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|source| SchedulerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let exit_code = output.status.code().unwrap_or(SCHEDULER_FAILURE_EXIT_CODE);
        debug!(
            step = %step.name,
            exit_code = exit_code,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "sbatch returned"
        );
        Ok(exit_code)
    }
}

/// Runs scripts directly with a shell on the polling host.
///
/// `#SBATCH` lines are plain comments to the shell, so stdout and stderr
/// are redirected to the step's log paths here instead.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    shell: String,
}

impl LocalScheduler {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new("bash")
    }
}

fn open_log(path: &Path) -> Result<File, SchedulerError> {
    File::create(path).map_err(|source| SchedulerError::Log {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn name(&self) -> &str {
        "local"
    }

    async fn run_blocking(&self, step: &CompiledStep) -> Result<i32, SchedulerError> {
        let stdout = open_log(&step.log_path)?;
        let stderr = open_log(&step.err_path)?;

        let mut command = Command::new(&self.shell);
        command
            .arg(&step.script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = step.script_path.parent() {
            command.current_dir(dir);
        }

        let status = command.status().await.map_err(|source| SchedulerError::Spawn {
            program: self.shell.clone(),
            source,
        })?;
        Ok(status.code().unwrap_or(SCHEDULER_FAILURE_EXIT_CODE))
    }
}
