use std::path::{Path, PathBuf};

use git2::{ErrorCode, IndexAddOption, MergeOptions, Repository, Signature};

use crate::{dlog_debug, dlog_warn, Error, Result};

/// Outcome of merging a task branch into the base branch.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Merge (or fast-forward) completed; holds the resulting commit.
    Merged { commit: String },
    /// The base branch already contained the task branch.
    UpToDate,
    /// The merge produced conflicts; the index was cleaned up and the base
    /// branch left untouched. Holds the conflicting paths.
    Conflicts { files: Vec<String> },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. } | MergeOutcome::UpToDate)
    }
}

pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        dlog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Name of the currently checked-out branch (or a short commit id on a
    /// detached HEAD). Used once per run to resolve the shared base branch.
    pub fn current_head(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head()?;
        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return Ok(name.to_string());
            }
        }
        let commit = head.peel_to_commit()?;
        Ok(format!("{:.7}", commit.id()))
    }

    pub fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let result = match repo.find_branch(branch, git2::BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        };
        result
    }

    /// Create `branch` pointing at the tip of `from`.
    pub fn create_branch(&self, branch: &str, from: &str) -> Result<()> {
        dlog_debug!("GitOps::create_branch branch={} from={}", branch, from);
        let repo = self.repo()?;
        if self.branch_exists(branch)? {
            return Err(Error::BranchExists(branch.to_string()));
        }
        let base = repo
            .find_branch(from, git2::BranchType::Local)
            .map_err(|_| Error::BranchNotFound(from.to_string()))?;
        let commit = base.get().peel_to_commit()?;
        repo.branch(branch, &commit, false)?;
        Ok(())
    }

    /// Check out an existing branch in the main working copy.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        dlog_debug!("GitOps::checkout_branch branch={}", branch);
        let repo = self.repo()?;
        let branch_ref = repo
            .find_branch(branch, git2::BranchType::Local)
            .map_err(|_| Error::BranchNotFound(branch.to_string()))?;
        let reference = branch_ref.into_reference();
        let commit = reference.peel_to_commit()?;
        repo.checkout_tree(commit.as_object(), None)?;
        repo.set_head(
            reference
                .name()
                .unwrap_or(&format!("refs/heads/{}", branch)),
        )?;
        Ok(())
    }

    /// Create `branch` from the tip of `from` and attach a worktree to it.
    pub fn create_worktree(&self, branch: &str, from: &str, worktree_path: &Path) -> Result<()> {
        dlog_debug!(
            "GitOps::create_worktree branch={} from={} path={}",
            branch,
            from,
            worktree_path.display()
        );
        let repo = self.repo()?;
        let base = repo
            .find_branch(from, git2::BranchType::Local)
            .map_err(|_| Error::BranchNotFound(from.to_string()))?;
        let commit = base.get().peel_to_commit()?;
        let branch_obj = repo.branch(branch, &commit, false)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // Use worktree path's folder name as worktree name (branch may contain slashes)
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(worktree_name, worktree_path, Some(&opts))?;
        dlog_debug!("Worktree created successfully");
        Ok(())
    }

    /// Remove a worktree and clean up all associated resources.
    /// This function attempts cleanup even if some operations fail.
    /// It's critical that we fully disassociate the branch from the worktree,
    /// otherwise a later merge or branch delete fails with "branch is already
    /// checked out".
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        dlog_debug!("GitOps::remove_worktree path={}", worktree_path.display());
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        // Try to find the worktree by path (may fail due to path canonicalization)
        let worktree_name: Option<String> = worktrees
            .iter()
            .flatten()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == worktree_path)
                    .unwrap_or(false)
            })
            .map(|s| s.to_string());

        // Also try to find by folder name as fallback
        let folder_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let worktree_name = worktree_name.or_else(|| {
            folder_name.as_ref().and_then(|fname| {
                worktrees
                    .iter()
                    .flatten()
                    .find(|name| *name == fname.as_str())
                    .map(|s| s.to_string())
            })
        });

        if let Some(ref name) = worktree_name {
            if let Ok(worktree) = repo.find_worktree(name) {
                let _ = worktree.unlock();
                let prune_result = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                ));
                if let Err(e) = prune_result {
                    dlog_warn!("Worktree prune failed for '{}': {}", name, e);
                }
            }
        }

        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)?;
        }

        // Clean up the git worktree admin directory (.git/worktrees/<name>).
        // If the admin dir survives, git thinks the branch is still checked out.
        if let Some(ref name) = worktree_name {
            self.cleanup_worktree_admin_dir(name);
        }
        if let Some(ref fname) = folder_name {
            self.cleanup_worktree_admin_dir(fname);
        }

        dlog_debug!("Worktree removed successfully");
        Ok(())
    }

    fn cleanup_worktree_admin_dir(&self, worktree_name: &str) {
        if let Ok(repo) = self.repo() {
            let admin_dir = repo.path().join("worktrees").join(worktree_name);
            if admin_dir.exists() {
                let _ = std::fs::remove_dir_all(&admin_dir);
            }
        }
    }

    /// Stage and commit everything in a working copy. Returns the commit id,
    /// or None when there was nothing to commit.
    pub fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<Option<String>> {
        dlog_debug!(
            "GitOps::commit_all path={} message={}",
            worktree_path.display(),
            crate::util::truncate(message, 60)
        );
        let repo = Repository::open(worktree_path)?;
        let statuses = repo.statuses(None)?;
        if statuses.is_empty() {
            dlog_debug!("commit_all: working copy clean, nothing to commit");
            return Ok(None);
        }

        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Drover", "drover@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        dlog_debug!("Commit created: {}", commit_id);
        Ok(Some(commit_id.to_string()))
    }

    /// Merge `branch` into `base` inside the main repository.
    ///
    /// Checks out `base`, analyzes, fast-forwards when possible, otherwise
    /// creates a merge commit. On conflicts the merge state is cleaned up,
    /// `base` is left as it was, and the conflicting paths are returned so
    /// the caller can retain the branch for manual resolution.
    pub fn merge_branch(&self, branch: &str, base: &str) -> Result<MergeOutcome> {
        dlog_debug!("GitOps::merge_branch branch={} base={}", branch, base);
        let repo = self.repo()?;

        let their_ref = repo
            .find_branch(branch, git2::BranchType::Local)
            .map_err(|_| Error::BranchNotFound(branch.to_string()))?;
        let their_commit = their_ref.get().peel_to_commit()?;

        self.checkout_branch(base)?;
        let base_commit = repo.head()?.peel_to_commit()?;

        let their_annotated = repo.find_annotated_commit(their_commit.id())?;
        let (analysis, _preference) = repo.merge_analysis(&[&their_annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }

        if analysis.is_fast_forward() {
            let refname = format!("refs/heads/{}", base);
            repo.reference(
                &refname,
                their_commit.id(),
                true,
                &format!("Fast-forward merge of {}", branch),
            )?;
            repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
            return Ok(MergeOutcome::Merged {
                commit: their_commit.id().to_string(),
            });
        }

        let mut merge_opts = MergeOptions::new();
        repo.merge(&[&their_annotated], Some(&mut merge_opts), None)?;

        let index = repo.index()?;
        if index.has_conflicts() {
            let files = conflict_paths(&index);
            let _ = repo.cleanup_state();
            // Drop the half-merged checkout so base stays pristine.
            let base_obj = base_commit.as_object();
            repo.reset(base_obj, git2::ResetType::Hard, None)?;
            return Ok(MergeOutcome::Conflicts { files });
        }

        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Drover", "drover@localhost"))?;
        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let message = format!("Merge branch {}", branch);
        let commit_id = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &message,
            &tree,
            &[&base_commit, &their_commit],
        )?;
        repo.cleanup_state()?;

        Ok(MergeOutcome::Merged {
            commit: commit_id.to_string(),
        })
    }

    /// Delete a local branch. Returns Ok even if the branch doesn't exist.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        dlog_debug!("GitOps::delete_branch branch={}", branch);
        let repo = self.repo()?;
        match repo.find_branch(branch, git2::BranchType::Local) {
            Ok(mut branch_ref) => {
                if let Err(e) = branch_ref.delete() {
                    // The branch might still be checked out elsewhere; the
                    // worktree cleanup already happened, so just log it.
                    dlog_warn!("Failed to delete branch '{}': {}", branch, e);
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                dlog_debug!("Branch '{}' not found (already deleted?)", branch);
            }
            Err(e) => {
                dlog_warn!("Error looking up branch '{}': {}", branch, e);
            }
        }
        Ok(())
    }

    pub fn list_worktrees(&self) -> Result<Vec<String>> {
        let repo = self.repo()?;
        Ok(repo
            .worktrees()?
            .iter()
            .flatten()
            .map(String::from)
            .collect())
    }

    /// Prune worktree admin entries whose directories no longer exist and
    /// delete leftover drover/ branches. Returns (worktrees, branches) pruned.
    pub fn cleanup_stale(&self) -> (usize, usize) {
        let mut pruned = 0;
        if let Ok(repo) = self.repo() {
            if let Ok(worktrees) = repo.worktrees() {
                for name in worktrees.iter().flatten() {
                    if let Ok(wt) = repo.find_worktree(name) {
                        if !wt.path().exists()
                            && wt
                                .prune(Some(
                                    git2::WorktreePruneOptions::new()
                                        .valid(true)
                                        .working_tree(true)
                                        .locked(true),
                                ))
                                .is_ok()
                        {
                            pruned += 1;
                        }
                    }
                }
            }
        }

        let mut deleted = 0;
        if let Ok(repo) = self.repo() {
            if let Ok(branches) = repo.branches(Some(git2::BranchType::Local)) {
                for branch_result in branches {
                    let Ok((mut branch, _)) = branch_result else {
                        continue;
                    };
                    let name = branch.name().ok().flatten().map(String::from);
                    let Some(branch_name) = name else {
                        continue;
                    };
                    if branch_name.starts_with("drover/") && branch.delete().is_ok() {
                        dlog_debug!("Deleted branch during cleanup: {}", branch_name);
                        deleted += 1;
                    }
                }
            }
        }

        (pruned, deleted)
    }
}

fn conflict_paths(index: &git2::Index) -> Vec<String> {
    let mut files = Vec::new();
    if let Ok(conflicts) = index.conflicts() {
        for conflict in conflicts.flatten() {
            let path = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
                .map(|e| String::from_utf8_lossy(&e.path).to_string());
            if let Some(path) = path {
                files.push(path);
            }
        }
    }
    files
}
