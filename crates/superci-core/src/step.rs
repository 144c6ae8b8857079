//! Declarative build steps and where they are loaded from.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigurationError;

/// One declared build step.
///
/// `env` keeps declaration order: later exports may reference earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStepSpec {
    pub name: String,

    /// Passed verbatim as `#SBATCH <option>` lines.
    #[serde(
        default,
        rename = "sbatch_options",
        alias = "scheduler_options",
        deserialize_with = "null_as_empty"
    )]
    pub scheduler_options: Vec<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub modules: Vec<String>,

    #[serde(default, deserialize_with = "scalar_env")]
    pub env: IndexMap<String, String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub commands: Vec<String>,
}

impl BuildStepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheduler_options: Vec::new(),
            modules: Vec::new(),
            env: IndexMap::new(),
            commands: Vec::new(),
        }
    }

    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.scheduler_options.push(option.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.modules.push(module.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }
}

/// Where a build's step list comes from.
#[derive(Debug, Clone)]
pub enum StepSource {
    /// Steps embedded in the poller's own configuration.
    Embedded(Vec<BuildStepSpec>),
    /// A step file inside the checked-out tree, relative to the workspace.
    Repository(PathBuf),
}

impl StepSource {
    /// Resolve the step list for a workspace holding the checked-out source.
    pub fn resolve(&self, workspace: &Path) -> Result<Vec<BuildStepSpec>, ConfigurationError> {
        match self {
            StepSource::Embedded(steps) => Ok(steps.clone()),
            StepSource::Repository(rel) => load_steps_file(&workspace.join(rel)),
        }
    }
}

#[derive(Deserialize)]
struct StepsFile {
    #[serde(default, deserialize_with = "null_as_empty")]
    steps: Vec<BuildStepSpec>,
}

/// Load the `steps:` list from a build-step file.
pub fn load_steps_file(path: &Path) -> Result<Vec<BuildStepSpec>, ConfigurationError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigurationError::MissingBuildFile(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigurationError::InvalidBuildFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    let file: StepsFile =
        serde_saphyr::from_str(&contents).map_err(|e| ConfigurationError::InvalidBuildFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(file.steps)
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Env values keep their YAML text: `3.10` stays `3.10`, `0755` stays `0755`.
fn scalar_env<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IndexMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}
