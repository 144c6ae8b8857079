//! Per-build workspace directories: `<root>/<owner>/<name>/<build id>`.

use std::fs;
use std::path::{Path, PathBuf};

use superci_state::RepoId;
use tracing::{debug, info};

use crate::config::WorkspacePolicy;
use crate::error::WorkspaceError;

/// Length of a build id (abbreviated commit SHA).
pub const BUILD_ID_LEN: usize = 7;

/// Build id for a commit: its first 7 hex characters.
///
/// Distinct commits sharing a 7-character prefix share a build id.
pub fn build_id(sha: &str) -> Result<String, WorkspaceError> {
    let id: String = sha.chars().take(BUILD_ID_LEN).collect();
    if id.chars().count() < BUILD_ID_LEN {
        return Err(WorkspaceError::ShortSha(sha.to_string()));
    }
    validate_build_id(&id)?;
    Ok(id.to_ascii_lowercase())
}

fn validate_build_id(id: &str) -> Result<(), WorkspaceError> {
    if id.len() != BUILD_ID_LEN || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WorkspaceError::InvalidBuildId(id.to_string()));
    }
    Ok(())
}

/// Allocates build workspaces under a root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    policy: WorkspacePolicy,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, policy: WorkspacePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a build would use, without creating it.
    pub fn workspace_path(&self, repo: &RepoId, build_id: &str) -> PathBuf {
        self.root.join(repo.relative_dir()).join(build_id)
    }

    /// Create (or, under `WorkspacePolicy::Reuse`, reuse) the workspace for a build.
    pub fn create_workspace(&self, repo: &RepoId, build_id: &str) -> Result<PathBuf, WorkspaceError> {
        validate_build_id(build_id)?;
        let path = self.workspace_path(repo, build_id);

        if path.exists() {
            return match self.policy {
                WorkspacePolicy::Reuse => {
                    debug!(workspace = %path.display(), "Reusing existing workspace");
                    Ok(path)
                }
                WorkspacePolicy::Fresh => Err(WorkspaceError::AlreadyExists(path)),
            };
        }

        info!(workspace = %path.display(), "Creating workspace directory");
        fs::create_dir_all(&path).map_err(|source| WorkspaceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
