//! Sequential loop behavior against a real backlog file.

use std::time::Duration;

use tempfile::TempDir;

use drover::core::AIResult;
use drover::orchestration::{
    DeferredTaskTracker, FeedbackQueue, ModelFallbackManager, NullObserver, RetryPolicy,
    SequentialExecutor, SequentialOptions,
};
use drover::source::{CachedSource, MarkdownSource};

use super::fixtures::MockEngine;

const PRD: &str = "\
# Backlog

- [ ] task one
- [ ] task two
- [ ] task three
";

fn write_prd(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("PRD.md");
    std::fs::write(&path, PRD).unwrap();
    path
}

fn executor(
    dir: &TempDir,
    engine: MockEngine,
    max_retries: u32,
) -> SequentialExecutor<CachedSource<MarkdownSource>, MockEngine> {
    let source = CachedSource::new(MarkdownSource::new(write_prd(dir)).unwrap());
    let (queue, _sender) = FeedbackQueue::bounded(8);
    SequentialExecutor::new(
        source,
        engine,
        RetryPolicy::new(max_retries, Duration::ZERO),
        ModelFallbackManager::new(
            Some("primary".to_string()),
            Some("fallback".to_string()),
            Duration::from_secs(3600),
            false,
        ),
        DeferredTaskTracker::open(dir.path().join("deferred.json")).unwrap(),
        Box::new(NullObserver),
        queue,
        None,
        dir.path().to_path_buf(),
        SequentialOptions::default(),
    )
}

#[tokio::test]
async fn happy_path_checks_every_item_through_cached_source() {
    let dir = TempDir::new().unwrap();
    let mut exec = executor(&dir, MockEngine::ok(), 2);

    let totals = exec.run().await.unwrap();

    assert_eq!(totals.tasks_completed, 3);
    assert_eq!(totals.tasks_failed, 0);
    assert_eq!(totals.total_input_tokens, 30);
    assert_eq!(totals.total_output_tokens, 15);

    // The run flushed the caching decorator: the file itself is updated.
    let content = std::fs::read_to_string(dir.path().join("PRD.md")).unwrap();
    assert_eq!(content.matches("- [x]").count(), 3);
    assert_eq!(content.matches("- [ ]").count(), 0);
}

#[tokio::test]
async fn persistent_rate_limit_fails_one_task_and_stops() {
    let dir = TempDir::new().unwrap();
    let engine = MockEngine::ok().with_default(AIResult::err("rate limit exceeded"));
    let mut exec = executor(&dir, engine, 2);

    let totals = exec.run().await.unwrap();

    // First task burns both attempts; the run stops before the others.
    assert_eq!(totals.tasks_failed, 1);
    assert_eq!(totals.tasks_completed, 0);

    let content = std::fs::read_to_string(dir.path().join("PRD.md")).unwrap();
    assert_eq!(content.matches("- [ ]").count(), 3);
}

#[tokio::test]
async fn rate_limited_attempts_switch_to_fallback_model() {
    let dir = TempDir::new().unwrap();
    let engine = MockEngine::ok().with_results(
        "task one",
        vec![AIResult::err("429 too many requests"), AIResult::ok("done")],
    );
    let mut exec = executor(&dir, engine, 3);

    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_completed, 3);
    assert_eq!(totals.tasks_failed, 0);
}

#[tokio::test]
async fn authentication_error_aborts_run_immediately() {
    let dir = TempDir::new().unwrap();
    let engine = MockEngine::ok().with_default(AIResult::err("Authentication failed"));
    let mut exec = executor(&dir, engine, 3);

    let totals = exec.run().await.unwrap();

    assert_eq!(totals.tasks_failed, 1);
    assert_eq!(totals.tasks_completed, 0);
    // Exactly one invocation: no retries for fatal errors, no further tasks.
    assert_eq!(exec_engine_calls(&exec), 1);

    let content = std::fs::read_to_string(dir.path().join("PRD.md")).unwrap();
    assert_eq!(content.matches("- [ ]").count(), 3);
}

#[tokio::test]
async fn unknown_error_stops_run_with_task_unchecked() {
    let dir = TempDir::new().unwrap();
    let engine = MockEngine::ok().with_default(AIResult::err("exit status 137"));
    let mut exec = executor(&dir, engine, 3);

    let totals = exec.run().await.unwrap();

    assert_eq!(totals.tasks_failed, 1);
    assert_eq!(exec_engine_calls(&exec), 1);
    let content = std::fs::read_to_string(dir.path().join("PRD.md")).unwrap();
    assert_eq!(content.matches("- [ ]").count(), 3);
}

#[tokio::test]
async fn deferral_counter_survives_restart_and_exhausts() {
    let dir = TempDir::new().unwrap();
    let prd = write_prd(&dir);
    let deferred_path = dir.path().join("deferred.json");

    let run = |engine: MockEngine| {
        let source = CachedSource::new(MarkdownSource::new(&prd).unwrap());
        let (queue, _sender) = FeedbackQueue::bounded(8);
        SequentialExecutor::new(
            source,
            engine,
            RetryPolicy::new(2, Duration::ZERO),
            ModelFallbackManager::new(None, None, Duration::from_secs(3600), false),
            DeferredTaskTracker::open(&deferred_path).unwrap(),
            Box::new(NullObserver),
            queue,
            None,
            dir.path().to_path_buf(),
            SequentialOptions::default(),
        )
    };

    // Run 1: task one rate-limits out; deferral 1 of 2, run stops early.
    let engine =
        MockEngine::ok().with_results("task one", vec![
            AIResult::err("rate limit exceeded"),
            AIResult::err("rate limit exceeded"),
        ]);
    let mut exec = run(engine);
    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_failed, 1);
    assert_eq!(totals.tasks_completed, 0);
    drop(exec);

    // Run 2 (fresh process): the same failure exhausts the deferral budget,
    // so the task is given up on and the loop continues with the rest.
    let engine =
        MockEngine::ok().with_results("task one", vec![
            AIResult::err("rate limit exceeded"),
            AIResult::err("rate limit exceeded"),
        ]);
    let mut exec = run(engine);
    let totals = exec.run().await.unwrap();
    assert_eq!(totals.tasks_failed, 1);
    assert_eq!(totals.tasks_completed, 2);

    let content = std::fs::read_to_string(&prd).unwrap();
    // task one remains unchecked for manual retry; the rest are done.
    assert!(content.contains("- [ ] task one"));
    assert_eq!(content.matches("- [x]").count(), 2);
}

fn exec_engine_calls(
    exec: &SequentialExecutor<CachedSource<MarkdownSource>, MockEngine>,
) -> usize {
    exec.engine().call_count()
}
