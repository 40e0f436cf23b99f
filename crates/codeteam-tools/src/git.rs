//! Version-control adapter. The orchestrator never inspects git state
//! directly — everything goes through this trait so tests can substitute
//! a scripted implementation.

use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitId(pub String);

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VersionControlError {
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("git `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

pub trait VersionControl {
    fn has_pending_changes(&self) -> Result<bool, VersionControlError>;
    /// Unified diff of uncommitted changes, untracked files included.
    fn diff(&self) -> Result<String, VersionControlError>;
    /// Porcelain status, used for working-tree digests.
    fn status_short(&self) -> Result<String, VersionControlError>;
    fn commit(&self, message: &str) -> Result<CommitId, VersionControlError>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    workspace: PathBuf,
}

impl GitCli {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String, VersionControlError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace)
            .output()?;
        if !output.status.success() {
            return Err(VersionControlError::CommandFailed {
                command: args.join(" "),
                output: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl VersionControl for GitCli {
    fn has_pending_changes(&self) -> Result<bool, VersionControlError> {
        Ok(!self.status_short()?.trim().is_empty())
    }

    fn diff(&self) -> Result<String, VersionControlError> {
        // `diff HEAD` covers staged + unstaged; untracked files only show
        // up in status, so both feed the tree digest.
        self.git(&["diff", "HEAD"]).or_else(|_| {
            // No HEAD yet (empty repository): fall back to the index diff.
            self.git(&["diff"])
        })
    }

    fn status_short(&self) -> Result<String, VersionControlError> {
        self.git(&["status", "--porcelain"])
    }

    fn commit(&self, message: &str) -> Result<CommitId, VersionControlError> {
        if !self.has_pending_changes()? {
            return Err(VersionControlError::CommitFailed(
                "working tree is clean, nothing to commit".to_string(),
            ));
        }
        self.git(&["add", "-A"])
            .map_err(|e| VersionControlError::CommitFailed(e.to_string()))?;
        self.git(&["commit", "-m", message])
            .map_err(|e| VersionControlError::CommitFailed(e.to_string()))?;
        let head = self
            .git(&["rev-parse", "HEAD"])
            .map_err(|e| VersionControlError::CommitFailed(e.to_string()))?;
        Ok(CommitId(head.trim().to_string()))
    }
}
