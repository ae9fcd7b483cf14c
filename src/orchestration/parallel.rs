//! Parallel backlog execution.
//!
//! Tasks fan out across isolated workers bounded by `max_parallel`, one
//! parallel group at a time. Workers share nothing mutable: each gets its
//! own worktree, branch, and fallback state machine. Integration is the
//! serial part — merge-back runs one branch at a time, ordered by task
//! completion, so conflict resolution stays deterministic and debuggable.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::{Disposition, ExecutionResult, Task};
use crate::git::{GitOps, MergeOutcome};
use crate::prompt::build_prompt;
use crate::source::TaskSource;
use crate::{dlog, dlog_warn, Result};

use super::attempt::{execute_with_retry, AttemptOutcome};
use super::deferred::DeferredTaskTracker;
use super::engine::AIEngine;
use super::fallback::ModelFallbackManager;
use super::isolation::{IsolationHandle, IsolationProvider};
use super::observer::Observer;
use super::retry::RetryPolicy;

/// Knobs for a parallel run.
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    /// Bounded worker pool size.
    pub max_parallel: usize,
    /// Leave every branch unmerged for the caller to integrate by hand.
    pub skip_merge: bool,
    /// Merge target; defaults to the current HEAD branch, resolved once per
    /// run and shared read-only by all workers.
    pub base_branch: Option<String>,
    /// Extra arguments for every engine invocation.
    pub engine_args: Vec<String>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            skip_merge: false,
            base_branch: None,
            engine_args: Vec::new(),
        }
    }
}

/// A worker slot's terminal report: the task, how its attempt ended, where
/// its isolated changes live, and when it resolved (merge ordering key).
struct WorkerOutcome {
    task: Task,
    outcome: AttemptOutcome,
    handle: Option<IsolationHandle>,
    completed_at: Instant,
}

pub struct ParallelExecutor<S: TaskSource, E: AIEngine, I: IsolationProvider> {
    source: S,
    engine: E,
    isolation: I,
    policy: RetryPolicy,
    /// Cloned into each worker; the state machine is per engine instance,
    /// never shared across concurrent invocations.
    fallback_template: ModelFallbackManager,
    deferred: DeferredTaskTracker,
    observer: Box<dyn Observer>,
    git: GitOps,
    options: ParallelOptions,
}

impl<S: TaskSource, E: AIEngine, I: IsolationProvider> ParallelExecutor<S, E, I> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        engine: E,
        isolation: I,
        policy: RetryPolicy,
        fallback_template: ModelFallbackManager,
        deferred: DeferredTaskTracker,
        observer: Box<dyn Observer>,
        git: GitOps,
        options: ParallelOptions,
    ) -> Self {
        Self {
            source,
            engine,
            isolation,
            policy,
            fallback_template,
            deferred,
            observer,
            git,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run the whole backlog group by group and return the totals.
    pub async fn run(&mut self) -> Result<ExecutionResult> {
        let mut totals = ExecutionResult::new();

        let base = match &self.options.base_branch {
            Some(branch) => branch.clone(),
            None => self.git.current_head()?,
        };

        let mut backlog = Vec::new();
        while let Some(task) = self.source.next_task()? {
            backlog.push(task);
        }
        let mut groups: BTreeMap<u32, Vec<Task>> = BTreeMap::new();
        for task in backlog {
            groups.entry(task.group_key()).or_default().push(task);
        }
        dlog!(
            "Parallel run: {} group(s), base branch {}",
            groups.len(),
            base
        );

        let cancel = CancellationToken::new();
        for (group, tasks) in groups {
            if cancel.is_cancelled() {
                dlog_warn!("Skipping group {} after fatal failure", group);
                break;
            }
            let outcomes = self.run_group(group, tasks, &base, &cancel).await;
            self.integrate_group(outcomes, &base, &mut totals)?;
        }

        self.source.flush()?;
        self.observer.on_run_end(&totals);
        Ok(totals)
    }

    /// Execute one group through the bounded worker pool.
    ///
    /// A slot frees as soon as a worker's engine invocation terminates; the
    /// next unstarted task takes it until the group is exhausted. A fatal
    /// outcome cancels further dispatch but lets in-flight siblings finish.
    async fn run_group(
        &self,
        group: u32,
        tasks: Vec<Task>,
        base: &str,
        cancel: &CancellationToken,
    ) -> Vec<WorkerOutcome> {
        dlog!("Group {}: {} task(s)", group, tasks.len());
        let mut queue = tasks.into_iter();
        let mut inflight = FuturesUnordered::new();

        for _ in 0..self.options.max_parallel.max(1) {
            let Some(task) = queue.next() else { break };
            self.observer.on_task_start(&task);
            inflight.push(self.run_worker(task, base));
        }

        let mut outcomes = Vec::new();
        while let Some(outcome) = inflight.next().await {
            match outcome.outcome {
                AttemptOutcome::Fatal(_) | AttemptOutcome::Unknown(_) => {
                    // Siblings finish their current invocation; nothing new
                    // starts, in this group or any later one.
                    cancel.cancel();
                }
                _ => {}
            }
            outcomes.push(outcome);

            if !cancel.is_cancelled() {
                if let Some(task) = queue.next() {
                    self.observer.on_task_start(&task);
                    inflight.push(self.run_worker(task, base));
                }
            }
        }
        outcomes
    }

    /// One worker slot: acquire isolation, run the attempt loop, commit
    /// whatever the engine left uncommitted.
    async fn run_worker(&self, task: Task, base: &str) -> WorkerOutcome {
        let handle = match self.isolation.acquire(base, &task.slug()) {
            Ok(handle) => handle,
            Err(e) => {
                return WorkerOutcome {
                    task,
                    outcome: AttemptOutcome::Unknown(format!("isolation acquire failed: {}", e)),
                    handle: None,
                    completed_at: Instant::now(),
                };
            }
        };

        let prompt = build_prompt(&task, &[]);
        let mut fallback = self.fallback_template.clone();
        let outcome = execute_with_retry(
            &self.engine,
            &prompt,
            &handle.path,
            &self.options.engine_args,
            &self.policy,
            &mut fallback,
        )
        .await;

        if matches!(outcome, AttemptOutcome::Success(_)) {
            if let Err(e) = self
                .git
                .commit_all(&handle.path, &format!("drover: {}", task.title))
            {
                dlog_warn!("Failed to commit worker changes for {}: {}", task.id, e);
            }
        }

        WorkerOutcome {
            task,
            outcome,
            handle: Some(handle),
            completed_at: Instant::now(),
        }
    }

    /// Serialize the group's integration onto the base branch, ordered by
    /// completion time. Isolation teardown is guaranteed for every worker;
    /// only a conflicted (or skip-merge) branch survives.
    fn integrate_group(
        &mut self,
        mut outcomes: Vec<WorkerOutcome>,
        base: &str,
        totals: &mut ExecutionResult,
    ) -> Result<()> {
        outcomes.sort_by_key(|o| o.completed_at);
        let source_type = self.source.source_type().to_string();
        let scope = self.source.scope();

        for worker in outcomes {
            let task = worker.task;
            match worker.outcome {
                AttemptOutcome::Success(result) => {
                    let handle = worker.handle.as_ref();
                    if self.options.skip_merge {
                        self.source.mark_complete(&task.id)?;
                        self.deferred.clear(&source_type, &scope, &task.id)?;
                        totals.record_success(&result);
                        self.observer.on_task_end(&task, &Disposition::Succeeded);
                        if let Some(handle) = handle {
                            self.release_keeping_branch(handle);
                        }
                        continue;
                    }
                    let Some(handle) = handle else { continue };
                    match self.git.merge_branch(&handle.branch, base) {
                        Ok(merge) if merge.is_merged() => {
                            self.source.mark_complete(&task.id)?;
                            self.deferred.clear(&source_type, &scope, &task.id)?;
                            totals.record_success(&result);
                            self.observer.on_task_end(&task, &Disposition::Succeeded);
                            self.release_fully(handle);
                        }
                        Ok(MergeOutcome::Conflicts { files }) => {
                            totals.record_failure();
                            let error = format!(
                                "merge conflict in {}; branch {} retained for manual resolution",
                                files.join(", "),
                                handle.branch
                            );
                            self.observer
                                .on_task_end(&task, &Disposition::Failed { error });
                            self.release_keeping_branch(handle);
                        }
                        Ok(_) => unreachable!("is_merged covers Merged and UpToDate"),
                        Err(e) => {
                            totals.record_failure();
                            self.observer.on_task_end(
                                &task,
                                &Disposition::Failed {
                                    error: format!("merge failed: {}", e),
                                },
                            );
                            self.release_keeping_branch(handle);
                        }
                    }
                }
                AttemptOutcome::Retryable(error) => {
                    let count = self.deferred.record_failure(&source_type, &scope, &task.id)?;
                    totals.record_failure();
                    if count >= self.policy.max_retries() {
                        self.deferred.clear(&source_type, &scope, &task.id)?;
                        self.observer
                            .on_task_end(&task, &Disposition::Failed { error });
                    } else {
                        self.observer
                            .on_task_end(&task, &Disposition::Deferred { error });
                    }
                    if let Some(handle) = worker.handle.as_ref() {
                        self.release_fully(handle);
                    }
                }
                AttemptOutcome::Fatal(error) => {
                    totals.record_failure();
                    self.observer
                        .on_task_end(&task, &Disposition::Fatal { error });
                    if let Some(handle) = worker.handle.as_ref() {
                        self.release_fully(handle);
                    }
                }
                AttemptOutcome::Unknown(error) => {
                    totals.record_failure();
                    self.observer
                        .on_task_end(&task, &Disposition::Failed { error });
                    if let Some(handle) = worker.handle.as_ref() {
                        self.release_fully(handle);
                    }
                }
            }
        }
        Ok(())
    }

    fn release_fully(&self, handle: &IsolationHandle) {
        if let Err(e) = self.isolation.release(handle) {
            dlog_warn!("Failed to release isolation {}: {}", handle.branch, e);
        }
    }

    fn release_keeping_branch(&self, handle: &IsolationHandle) {
        if let Err(e) = self.isolation.release_keep_branch(handle) {
            dlog_warn!("Failed to release worktree {}: {}", handle.branch, e);
        }
    }
}
