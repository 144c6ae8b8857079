//! Git checkout of the commit under test into its workspace.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::CheckoutError;

/// What to check out and where.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutRequest<'a> {
    pub clone_url: &'a str,
    pub branch: &'a str,
    pub commit: &'a str,
    pub dest: &'a Path,
}

/// Materializes a commit's source tree.
#[async_trait]
pub trait SourceCheckout: Send + Sync {
    async fn checkout(&self, request: &CheckoutRequest<'_>) -> Result<(), CheckoutError>;
}

/// Checkout using the `git` CLI.
///
/// A fresh workspace gets a single-branch clone; a reused workspace that
/// already holds a clone is fetched instead. Either way HEAD ends detached
/// at the requested commit.
#[derive(Debug, Clone, Default)]
pub struct GitCheckout;

impl GitCheckout {
    pub fn new() -> Self {
        Self
    }
}

async fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<(), CheckoutError> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let output = command.output().await?;

    if !output.status.success() {
        return Err(CheckoutError::Git {
            command: args.first().copied().unwrap_or_default().to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    debug!(args = ?args, "git succeeded");
    Ok(())
}

#[async_trait]
impl SourceCheckout for GitCheckout {
    async fn checkout(&self, request: &CheckoutRequest<'_>) -> Result<(), CheckoutError> {
        let dest = request.dest;
        let dest_str = dest.to_string_lossy();

        if dest.join(".git").exists() {
            info!(workspace = %dest.display(), branch = %request.branch, "Fetching into existing clone");
            run_git(Some(dest), &["fetch", "--quiet", "origin", request.branch]).await?;
        } else {
            info!(
                url = %request.clone_url,
                branch = %request.branch,
                workspace = %dest.display(),
                "Cloning repository"
            );
            let branch_arg = format!("--branch={}", request.branch);
            run_git(
                None,
                &[
                    "clone",
                    "--quiet",
                    "--single-branch",
                    &branch_arg,
                    request.clone_url,
                    &dest_str,
                ],
            )
            .await?;
        }

        run_git(Some(dest), &["checkout", "--quiet", "--detach", request.commit]).await
    }
}
