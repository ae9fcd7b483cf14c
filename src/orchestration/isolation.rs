//! Worker isolation contract.
//!
//! Each concurrent attempt needs an exclusive working directory and a
//! private branch off the shared base; the orchestrator only cares about
//! this contract, not the mechanism behind it. The shipped provider uses
//! git worktrees.

use std::path::PathBuf;

use uuid::Uuid;

use crate::git::GitOps;
use crate::{dlog_debug, Result};

/// An acquired isolation slot: exclusive path plus private branch.
#[derive(Debug, Clone)]
pub struct IsolationHandle {
    pub path: PathBuf,
    pub branch: String,
}

pub trait IsolationProvider: Send + Sync {
    /// Allocate a working directory and branch off `base_branch`. The slug
    /// only influences naming.
    fn acquire(&self, base_branch: &str, slug: &str) -> Result<IsolationHandle>;

    /// Tear the slot down entirely: working directory and branch.
    fn release(&self, handle: &IsolationHandle) -> Result<()>;

    /// Tear down the working directory but retain the branch (merge
    /// conflicts awaiting manual resolution, `skip_merge` runs).
    fn release_keep_branch(&self, handle: &IsolationHandle) -> Result<()>;
}

/// Git-worktree-backed isolation.
pub struct WorktreeProvider {
    git: GitOps,
    worktrees_dir: PathBuf,
}

impl WorktreeProvider {
    pub fn new(git: GitOps, worktrees_dir: PathBuf) -> Self {
        Self { git, worktrees_dir }
    }
}

impl IsolationProvider for WorktreeProvider {
    fn acquire(&self, base_branch: &str, slug: &str) -> Result<IsolationHandle> {
        // Suffix with a uuid fragment so same-titled tasks never collide.
        let nonce = Uuid::new_v4().to_string()[..8].to_string();
        let branch = format!("drover/{}-{}", slug, nonce);
        let path = self.worktrees_dir.join(format!("{}-{}", slug, nonce));
        std::fs::create_dir_all(&self.worktrees_dir)?;
        self.git.create_worktree(&branch, base_branch, &path)?;
        dlog_debug!("Acquired isolation: branch={} path={}", branch, path.display());
        Ok(IsolationHandle { path, branch })
    }

    fn release(&self, handle: &IsolationHandle) -> Result<()> {
        self.git.remove_worktree(&handle.path)?;
        self.git.delete_branch(&handle.branch)?;
        dlog_debug!("Released isolation: branch={}", handle.branch);
        Ok(())
    }

    fn release_keep_branch(&self, handle: &IsolationHandle) -> Result<()> {
        self.git.remove_worktree(&handle.path)?;
        dlog_debug!("Released worktree, kept branch {}", handle.branch);
        Ok(())
    }
}
