//! Compile declared build steps into Slurm batch scripts.
//!
//! Artifacts are named from a 3-digit zero-padded step index, so a workspace
//! always lists them in execution order:
//!
//! ```text
//! <workspace>/step-000.sh   script
//! <workspace>/step-000.out  stdout (#SBATCH -o)
//! <workspace>/step-000.err  stderr (#SBATCH -e)
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::EmptyStepsPolicy;
use crate::error::ConfigurationError;
use crate::step::BuildStepSpec;

/// Interpreter line of every generated script.
pub const SCRIPT_INTERPRETER: &str = "#!/bin/bash";

/// A build step rendered to disk, ready for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledStep {
    pub index: usize,
    pub name: String,
    pub script_path: PathBuf,
    /// Stdout destination; also the path recorded in the run log.
    pub log_path: PathBuf,
    /// Stderr destination, beside `log_path`.
    pub err_path: PathBuf,
}

impl CompiledStep {
    fn allocate(index: usize, name: &str, workspace: &Path) -> Self {
        let stem = artifact_stem(index);
        Self {
            index,
            name: name.to_string(),
            script_path: workspace.join(format!("{stem}.sh")),
            log_path: workspace.join(format!("{stem}.out")),
            err_path: workspace.join(format!("{stem}.err")),
        }
    }
}

/// `step-NNN` for a zero-based step index.
pub fn artifact_stem(index: usize) -> String {
    format!("step-{index:03}")
}

/// Translates `BuildStepSpec`s into scripts inside a workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepCompiler {
    empty_steps: EmptyStepsPolicy,
}

impl StepCompiler {
    pub fn new(empty_steps: EmptyStepsPolicy) -> Self {
        Self { empty_steps }
    }

    /// Validate every step, then write one script per step.
    ///
    /// Nothing is written if any step is invalid.
    pub fn compile(
        &self,
        steps: &[BuildStepSpec],
        workspace: &Path,
    ) -> Result<Vec<CompiledStep>, ConfigurationError> {
        self.validate(steps)?;

        let mut compiled = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let artifact = CompiledStep::allocate(index, &step.name, workspace);
            let script = render_script(step, &artifact, workspace);
            write_script(&artifact.script_path, &script)?;
            debug!(
                step = %step.name,
                script = %artifact.script_path.display(),
                bytes = script.len(),
                "Wrote batch script"
            );
            compiled.push(artifact);
        }

        info!(steps = compiled.len(), workspace = %workspace.display(), "Compiled build steps");
        Ok(compiled)
    }

    /// Boundary checks on maintainer-supplied steps.
    ///
    /// Commands stay verbatim; only values that end up on a single script
    /// line are checked for line breaks.
    pub fn validate(&self, steps: &[BuildStepSpec]) -> Result<(), ConfigurationError> {
        if steps.is_empty() && self.empty_steps == EmptyStepsPolicy::Reject {
            return Err(ConfigurationError::EmptySteps);
        }

        let mut seen = HashSet::new();
        for step in steps {
            let invalid = |reason: String| ConfigurationError::InvalidStep {
                step: step.name.clone(),
                reason,
            };

            if step.name.trim().is_empty() {
                return Err(invalid("step name must not be empty".to_string()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ConfigurationError::DuplicateStepName(step.name.clone()));
            }
            for option in &step.scheduler_options {
                if has_line_break(option) {
                    return Err(invalid(format!("scheduler option {option:?} spans lines")));
                }
            }
            for module in &step.modules {
                if has_line_break(module) || module.trim().is_empty() {
                    return Err(invalid(format!("invalid module name {module:?}")));
                }
            }
            for (key, value) in &step.env {
                if !is_shell_identifier(key) {
                    return Err(invalid(format!("invalid environment variable name {key:?}")));
                }
                if has_line_break(value) {
                    return Err(invalid(format!("value of {key} spans lines")));
                }
            }
            if let Some(command) = step.commands.iter().find(|c| c.contains('\0')) {
                return Err(invalid(format!("command {command:?} contains a NUL byte")));
            }
        }
        Ok(())
    }
}

/// Render the script text for one step. Pure and deterministic.
pub fn render_script(step: &BuildStepSpec, artifact: &CompiledStep, workspace: &Path) -> String {
    let mut script = String::new();
    script.push_str(SCRIPT_INTERPRETER);
    script.push('\n');

    for option in &step.scheduler_options {
        script.push_str(&format!("#SBATCH {option}\n"));
    }
    script.push_str(&format!("#SBATCH -o {}\n", artifact.log_path.display()));
    script.push_str(&format!("#SBATCH -e {}\n", artifact.err_path.display()));

    script.push('\n');
    if !step.modules.is_empty() {
        script.push_str("module purge\n");
        for module in &step.modules {
            script.push_str(&format!("module load {module}\n"));
        }
    }

    script.push('\n');
    script.push_str(&format!("export WORKSPACE={}\n", workspace.display()));
    for (key, value) in &step.env {
        script.push_str(&format!("export {key}={value}\n"));
    }

    script.push('\n');
    for command in &step.commands {
        script.push_str(command);
        script.push('\n');
    }

    script
}

fn write_script(path: &Path, script: &str) -> Result<(), ConfigurationError> {
    let to_err = |source| ConfigurationError::ScriptWrite {
        path: path.to_path_buf(),
        source,
    };
    fs::write(path, script).map_err(to_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(to_err)?;
    }
    Ok(())
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn is_shell_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
