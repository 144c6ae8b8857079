//! Error taxonomy for the trigger-to-report pipeline.

use std::path::PathBuf;

use superci_state::StorageError;

use crate::hosting::HostingError;

/// Errors loading the top-level configuration. Fatal for the whole poll.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {reason}")]
    Yaml { path: PathBuf, reason: String },

    #[error("invalid config field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("cannot read access token from {path}: {reason}")]
    Token { path: PathBuf, reason: String },
}

/// Structural problems with a build: no steps can run.
///
/// Surfaced as commit status `failure` with aggregate status -1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no build configuration at {0}")]
    MissingBuildFile(PathBuf),

    #[error("invalid build configuration {path}: {reason}")]
    InvalidBuildFile { path: PathBuf, reason: String },

    #[error("step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("duplicate step name '{0}'")]
    DuplicateStepName(String),

    #[error("build configuration declares no steps")]
    EmptySteps,

    #[error("cannot write build script {path}: {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Workspace allocation failures.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("invalid build id '{0}': expected 7 hex characters")]
    InvalidBuildId(String),

    #[error("commit sha '{0}' is too short to derive a build id")]
    ShortSha(String),

    #[error("workspace {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("cannot create workspace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source checkout failures.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("`git {command}` exited with {code}: {stderr}")]
    Git {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// The scheduler could not be invoked at all (distinct from a job that ran and failed).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that stops a triggered build before its first step runs.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("workspace: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("checkout: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl PipelineError {
    /// Short text for the commit status description.
    pub fn status_description(&self) -> String {
        match self {
            PipelineError::Workspace(_) => "SuperCI could not allocate a workspace".to_string(),
            PipelineError::Checkout(_) => "SuperCI could not check out the commit".to_string(),
            PipelineError::Configuration(ConfigurationError::MissingBuildFile(_)) => {
                "SuperCI found no build configuration".to_string()
            }
            PipelineError::Configuration(e) => format!("SuperCI configuration error: {e}"),
        }
    }
}

/// Per-pull-request failures during a poll; logged, never fatal to the cycle.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("hosting service: {0}")]
    Hosting(#[from] HostingError),

    #[error("run ledger: {0}")]
    Storage(#[from] StorageError),
}
