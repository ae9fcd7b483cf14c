//! Parallel execution correctness: group ordering, bounded concurrency,
//! fatal-stop semantics.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tempfile::TempDir;

use drover::core::AIResult;
use drover::git::GitOps;
use drover::orchestration::{
    DeferredTaskTracker, ModelFallbackManager, NullObserver, ParallelExecutor, ParallelOptions,
    RetryPolicy, WorktreeProvider,
};

use super::fixtures::{init_repo, MockEngine, VecSource};

fn parallel_executor(
    repo_dir: &TempDir,
    state_dir: &TempDir,
    source: VecSource,
    engine: MockEngine,
    max_parallel: usize,
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
        ParallelOptions {
            max_parallel,
            ..ParallelOptions::default()
        },
    )
}

#[tokio::test]
async fn all_tasks_in_one_group_complete_and_merge() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let engine = MockEngine::ok()
        .with_write("alpha", "alpha.out", "alpha")
        .with_write("beta", "beta.out", "beta")
        .with_write("gamma", "gamma.out", "gamma");
    let source = VecSource::new(&["alpha", "beta", "gamma"]);
    let mut exec = parallel_executor(&repo_dir, &state_dir, source, engine, 2);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 3);
    assert_eq!(totals.tasks_failed, 0);

    // Isolated changes landed on the base branch.
    assert!(repo_dir.path().join("alpha.out").exists());
    assert!(repo_dir.path().join("beta.out").exists());
    assert!(repo_dir.path().join("gamma.out").exists());

    // Every task marked complete; all isolation torn down.
    assert!(exec.source().is_complete("alpha"));
    assert!(exec.source().is_complete("beta"));
    assert!(exec.source().is_complete("gamma"));
    let ops = GitOps::new(repo_dir.path()).unwrap();
    assert!(ops.list_worktrees().unwrap().is_empty());
}

#[tokio::test]
async fn pool_never_exceeds_max_parallel() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let mut engine = MockEngine::ok();
    for title in ["a", "b", "c", "d", "e"] {
        engine = engine.with_delay(title, Duration::from_millis(40));
    }
    let source = VecSource::new(&["a", "b", "c", "d", "e"]);
    let mut exec = parallel_executor(&repo_dir, &state_dir, source, engine, 2);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 5);
    assert!(exec.engine().max_inflight.load(Ordering::SeqCst) <= 2);
    // The pool actually ran concurrently rather than serially.
    assert_eq!(exec.engine().max_inflight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn group_two_waits_for_group_one() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let engine = MockEngine::ok()
        .with_delay("g1-slow", Duration::from_millis(80))
        .with_delay("g1-fast", Duration::from_millis(10));
    let source = VecSource::with_groups(&[
        ("g1-slow", 1),
        ("g1-fast", 1),
        ("g2-first", 2),
        ("g2-second", 2),
    ]);
    let mut exec = parallel_executor(&repo_dir, &state_dir, source, engine, 4);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 4);

    let calls = exec.engine().calls.lock().unwrap().clone();
    let last_g1 = calls.iter().rposition(|t| t.starts_with("g1")).unwrap();
    let first_g2 = calls.iter().position(|t| t.starts_with("g2")).unwrap();
    assert!(
        last_g1 < first_g2,
        "group 2 dispatched before group 1 resolved: {:?}",
        calls
    );
}

#[tokio::test]
async fn fatal_in_one_worker_stops_further_dispatch() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let engine = MockEngine::ok()
        .with_results("boom", vec![AIResult::err("invalid api key")]);
    let source = VecSource::new(&["first", "boom", "third", "fourth"]);
    // One worker: strictly ordered dispatch, so the fatal second task must
    // prevent the third and fourth from ever starting.
    let mut exec = parallel_executor(&repo_dir, &state_dir, source, engine, 1);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 1);
    assert_eq!(totals.tasks_failed, 1);

    let calls = exec.engine().calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["first".to_string(), "boom".to_string()]);
    assert!(!exec.source().is_complete("third"));
    assert!(!exec.source().is_complete("fourth"));
}

#[tokio::test]
async fn fatal_in_group_one_skips_group_two_entirely() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let engine = MockEngine::ok()
        .with_results("bad", vec![AIResult::err("authentication failed")]);
    let source = VecSource::with_groups(&[("bad", 1), ("later", 2)]);
    let mut exec = parallel_executor(&repo_dir, &state_dir, source, engine, 2);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_failed, 1);
    assert_eq!(totals.tasks_completed, 0);
    assert_eq!(exec.engine().call_count(), 1);
}

#[tokio::test]
async fn retryable_exhaustion_defers_task_but_group_continues() {
    let (repo_dir, _ops, _base) = init_repo();
    let state_dir = TempDir::new().unwrap();

    let engine = MockEngine::ok().with_results(
        "flaky",
        vec![
            AIResult::err("rate limit exceeded"),
            AIResult::err("rate limit exceeded"),
        ],
    );
    let source = VecSource::new(&["flaky", "solid"]);
    let mut exec = parallel_executor(&repo_dir, &state_dir, source, engine, 1);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 1);
    assert_eq!(totals.tasks_failed, 1);
    assert!(!exec.source().is_complete("flaky"));
    assert!(exec.source().is_complete("solid"));

    // Abandoned worker's isolation fully torn down.
    let ops = GitOps::new(repo_dir.path()).unwrap();
    assert!(ops.list_worktrees().unwrap().is_empty());
}
