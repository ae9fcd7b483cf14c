//! Serialized merge-back: ordering by completion time, conflict handling,
//! and skip-merge runs.

use std::time::Duration;

use git2::Repository;
use tempfile::TempDir;

use drover::git::GitOps;
use drover::orchestration::{
    DeferredTaskTracker, ModelFallbackManager, NullObserver, ParallelExecutor, ParallelOptions,
    RetryPolicy, WorktreeProvider,
};

use super::fixtures::{init_repo, MockEngine, VecSource};

fn executor_with_options(
    repo_dir: &TempDir,
    state_dir: &TempDir,
    source: VecSource,
    engine: MockEngine,
    options: ParallelOptions,
) -> ParallelExecutor<VecSource, MockEngine, WorktreeProvider> {
    let git = GitOps::new(repo_dir.path()).unwrap();
    let provider = WorktreeProvider::new(
        GitOps::new(repo_dir.path()).unwrap(),
        state_dir.path().join("worktrees"),
    );
    ParallelExecutor::new(
        source,
        engine,
        provider,
        RetryPolicy::new(2, Duration::ZERO),
        ModelFallbackManager::new(None, None, Duration::from_secs(3600), false),
        DeferredTaskTracker::open(state_dir.path().join("deferred.json")).unwrap(),
        Box::new(NullObserver),
        git,
        options,
    )
}

#[tokio::test]
async fn merges_follow_completion_order_not_dispatch_order() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    // "slow" is dispatched first but finishes last; "fast" must merge first,
    // leaving the slow branch's merge commit at HEAD.
    let engine = MockEngine::ok()
        .with_delay("slow", Duration::from_millis(120))
        .with_write("slow", "slow.out", "slow")
        .with_delay("fast", Duration::from_millis(10))
        .with_write("fast", "fast.out", "fast");
    let source = VecSource::new(&["slow", "fast"]);
    let mut exec = executor_with_options(
        &repo_dir,
        &state_dir,
        source,
        engine,
        ParallelOptions {
            max_parallel: 2,
            ..ParallelOptions::default()
        },
    );

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 2);
    assert_eq!(totals.tasks_failed, 0);

    assert!(repo_dir.path().join("fast.out").exists());
    assert!(repo_dir.path().join("slow.out").exists());

    // First merge fast-forwards; the second (the slow task) diverged and
    // produced a merge commit, so HEAD names the slow task's branch.
    let repo = Repository::open(repo_dir.path()).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    let message = head.message().unwrap_or_default().to_string();
    assert!(
        message.contains("drover/slow"),
        "expected HEAD to be the slow branch's merge commit, got: {}",
        message
    );
}

#[tokio::test]
async fn conflicting_task_fails_but_keeps_branch_for_manual_resolution() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    // Both tasks rewrite the same file with different content; whichever
    // merges second conflicts.
    let engine = MockEngine::ok()
        .with_delay("red", Duration::from_millis(10))
        .with_write("red", "color.txt", "red\n")
        .with_delay("blue", Duration::from_millis(60))
        .with_write("blue", "color.txt", "blue\n");
    let source = VecSource::new(&["red", "blue"]);
    let mut exec = executor_with_options(
        &repo_dir,
        &state_dir,
        source,
        engine,
        ParallelOptions {
            max_parallel: 2,
            ..ParallelOptions::default()
        },
    );

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 1);
    assert_eq!(totals.tasks_failed, 1);

    // The first-completed task won and is on base.
    let content = std::fs::read_to_string(repo_dir.path().join("color.txt")).unwrap();
    assert_eq!(content, "red\n");
    assert!(exec.source().is_complete("red"));
    assert!(!exec.source().is_complete("blue"));

    // The conflicted branch survives for manual resolution; its worktree
    // does not.
    let ops = GitOps::new(repo_dir.path()).unwrap();
    assert!(ops.list_worktrees().unwrap().is_empty());
    let repo = Repository::open(repo_dir.path()).unwrap();
    let branches: Vec<String> = repo
        .branches(Some(git2::BranchType::Local))
        .unwrap()
        .flatten()
        .filter_map(|(b, _)| b.name().ok().flatten().map(String::from))
        .filter(|name| name.starts_with("drover/blue"))
        .collect();
    assert_eq!(branches.len(), 1, "blue branch should be retained");
}

#[tokio::test]
async fn skip_merge_leaves_all_branches_and_marks_complete() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let engine = MockEngine::ok()
        .with_write("one", "one.out", "1")
        .with_write("two", "two.out", "2");
    let source = VecSource::new(&["one", "two"]);
    let mut exec = executor_with_options(
        &repo_dir,
        &state_dir,
        source,
        engine,
        ParallelOptions {
            max_parallel: 2,
            skip_merge: true,
            ..ParallelOptions::default()
        },
    );

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 2);
    assert_eq!(totals.tasks_failed, 0);

    // Nothing merged: base has neither file.
    assert!(!repo_dir.path().join("one.out").exists());
    assert!(!repo_dir.path().join("two.out").exists());

    // Tasks are still complete (merge explicitly skipped), and every branch
    // was left for the caller while worktrees were torn down.
    assert!(exec.source().is_complete("one"));
    assert!(exec.source().is_complete("two"));
    let ops = GitOps::new(repo_dir.path()).unwrap();
    assert!(ops.list_worktrees().unwrap().is_empty());

    let repo = Repository::open(repo_dir.path()).unwrap();
    let drover_branches = repo
        .branches(Some(git2::BranchType::Local))
        .unwrap()
        .flatten()
        .filter_map(|(b, _)| b.name().ok().flatten().map(String::from))
        .filter(|name| name.starts_with("drover/"))
        .count();
    assert_eq!(drover_branches, 2);
}
