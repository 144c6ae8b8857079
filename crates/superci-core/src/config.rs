//! Poller configuration: the `config:` block of the YAML file and the
//! build steps it embeds or points at.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use superci_state::RepoId;

use crate::error::ConfigError;
use crate::step::{BuildStepSpec, StepSource};

/// Comment body that triggers a build unless overridden.
pub const DEFAULT_TRIGGER: &str = "/superci";

const DEFAULT_API_URL: &str = "https://api.github.com";

// -----------------------------------------------------------------------------
// Config (root)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub config: CiConfig,
    #[serde(default)]
    pub steps: Vec<BuildStepSpec>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|e| match e {
            ConfigError::Yaml { reason, .. } => ConfigError::Yaml {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_saphyr::from_str(contents).map_err(|e| ConfigError::Yaml {
                path: PathBuf::new(),
                reason: e.to_string(),
            })?;
        config.config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ci = &self.config;
        require_non_empty("config.branch", &ci.branch)?;
        require_non_empty("config.context", &ci.context)?;
        require_non_empty("config.trigger", &ci.trigger)?;
        if ci.workspace_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "config.workspace_root",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(rel) = &ci.superci_yaml {
            let escapes = rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if rel.as_os_str().is_empty() || escapes {
                return Err(ConfigError::InvalidField {
                    field: "config.superci_yaml",
                    reason: format!(
                        "'{}' must be a relative path inside the checkout",
                        rel.display()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Where this build's steps come from.
    pub fn step_source(&self) -> StepSource {
        match &self.config.superci_yaml {
            Some(rel) => StepSource::Repository(rel.clone()),
            None => StepSource::Embedded(self.steps.clone()),
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// CiConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CiConfig {
    pub repository: RepoId,
    pub branch: String,
    pub workspace_root: PathBuf,
    pub github_access_token_path: PathBuf,
    pub context: String,
    #[serde(default)]
    pub superci_yaml: Option<PathBuf>,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerKind,
    #[serde(default)]
    pub workspace_policy: WorkspacePolicy,
    #[serde(default)]
    pub empty_steps: EmptyStepsPolicy,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub target_url: Option<String>,
}

impl CiConfig {
    /// Ledger root; `~/.superci` unless `log_dir` is set.
    pub fn ledger_root(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| expand_home(Path::new("~/.superci")))
    }

    /// Read the access token: first line of the token file, trimmed.
    pub fn read_token(&self) -> Result<String, ConfigError> {
        let path = &self.github_access_token_path;
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Token {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let token = contents.lines().next().unwrap_or_default().trim().to_string();
        if token.is_empty() {
            return Err(ConfigError::Token {
                path: path.clone(),
                reason: "token file is empty".to_string(),
            });
        }
        Ok(token)
    }

    fn expand_paths(&mut self) {
        self.workspace_root = expand_home(&self.workspace_root);
        self.github_access_token_path = expand_home(&self.github_access_token_path);
        self.log_dir = self.log_dir.as_deref().map(expand_home);
    }
}

fn default_trigger() -> String {
    DEFAULT_TRIGGER.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

// -----------------------------------------------------------------------------
// Policies
// -----------------------------------------------------------------------------

/// Which batch system runs the generated scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// `sbatch --wait`
    #[default]
    Slurm,
    /// `bash` on the polling host
    Local,
}

/// What to do when a build's workspace directory already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspacePolicy {
    /// Reuse the directory as-is.
    #[default]
    Reuse,
    /// Refuse to build into an existing directory.
    Fresh,
}

/// What a build with zero declared steps means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyStepsPolicy {
    /// Configuration error: report failure, aggregate status -1.
    #[default]
    Reject,
    /// Vacuous success: aggregate status 0.
    Succeed,
}
