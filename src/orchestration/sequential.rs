//! Sequential backlog execution.
//!
//! One task at a time through a single engine, strictly one invocation in
//! flight. The loop owns the retry/fallback policy, optional branch-per-task
//! isolation with guaranteed return to the base branch, pull-request
//! creation, and the non-blocking feedback drain between dispatch cycles.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::{Disposition, ExecutionResult, Task};
use crate::git::GitOps;
use crate::prompt::build_prompt;
use crate::source::TaskSource;
use crate::{dlog, dlog_error, dlog_warn, Result};

use super::attempt::{execute_with_retry, AttemptOutcome};
use super::deferred::DeferredTaskTracker;
use super::engine::AIEngine;
use super::fallback::ModelFallbackManager;
use super::feedback::FeedbackQueue;
use super::observer::Observer;
use super::retry::RetryPolicy;

/// Knobs for a sequential run.
#[derive(Debug, Clone)]
pub struct SequentialOptions {
    /// Hard cap on loop iterations; None means run to backlog exhaustion.
    pub max_iterations: Option<u64>,
    /// Create a dedicated branch per task and return to base afterward.
    pub branch_per_task: bool,
    /// Merge target / branch point; defaults to the current HEAD branch.
    pub base_branch: Option<String>,
    /// Open a pull request from each completed task branch (`gh` CLI).
    pub create_pr: bool,
    /// Block for follow-up input after each success, bounded by
    /// `followup_timeout`.
    pub interactive: bool,
    /// Inactivity timeout for the interactive prompt; auto-continues.
    pub followup_timeout: Duration,
    /// Extra arguments for every engine invocation.
    pub engine_args: Vec<String>,
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            branch_per_task: false,
            base_branch: None,
            create_pr: false,
            interactive: false,
            followup_timeout: Duration::from_secs(30),
            engine_args: Vec::new(),
        }
    }
}

/// Why the loop stopped, beyond backlog exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Stop,
}

pub struct SequentialExecutor<S: TaskSource, E: AIEngine> {
    source: S,
    engine: E,
    policy: RetryPolicy,
    fallback: ModelFallbackManager,
    deferred: DeferredTaskTracker,
    observer: Box<dyn Observer>,
    feedback: FeedbackQueue,
    git: Option<GitOps>,
    workdir: PathBuf,
    options: SequentialOptions,
}

impl<S: TaskSource, E: AIEngine> SequentialExecutor<S, E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        engine: E,
        policy: RetryPolicy,
        fallback: ModelFallbackManager,
        deferred: DeferredTaskTracker,
        observer: Box<dyn Observer>,
        feedback: FeedbackQueue,
        git: Option<GitOps>,
        workdir: PathBuf,
        options: SequentialOptions,
    ) -> Self {
        Self {
            source,
            engine,
            policy,
            fallback,
            deferred,
            observer,
            feedback,
            git,
            workdir,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run the backlog to completion (or early stop) and return the totals.
    pub async fn run(&mut self) -> Result<ExecutionResult> {
        let mut totals = ExecutionResult::new();
        let mut pending_feedback: Vec<String> = Vec::new();
        let mut iterations = 0u64;

        let base_branch = match (&self.git, self.options.branch_per_task) {
            (Some(git), true) => Some(match &self.options.base_branch {
                Some(branch) => branch.clone(),
                None => git.current_head()?,
            }),
            _ => None,
        };

        loop {
            if let Some(cap) = self.options.max_iterations {
                if iterations >= cap {
                    dlog!("Iteration cap {} reached, stopping", cap);
                    break;
                }
            }
            iterations += 1;

            pending_feedback.extend(self.feedback.drain());

            let Some(task) = self.source.next_task()? else {
                dlog!("Backlog exhausted after {} iteration(s)", iterations - 1);
                break;
            };

            self.observer.on_task_start(&task);
            let prompt = build_prompt(&task, &pending_feedback);

            let task_branch = self.enter_task_branch(&task, base_branch.as_deref())?;

            let outcome = execute_with_retry(
                &self.engine,
                &prompt,
                &self.workdir,
                &self.options.engine_args,
                &self.policy,
                &mut self.fallback,
            )
            .await;

            // Guaranteed cleanup: back to base regardless of outcome.
            if let (Some(git), Some(base)) = (&self.git, base_branch.as_deref()) {
                if let Err(e) = git.checkout_branch(base) {
                    dlog_warn!("Failed to return to base branch {}: {}", base, e);
                }
            }

            let control = self
                .disposition(
                    &task,
                    outcome,
                    task_branch.as_deref(),
                    &mut totals,
                    &mut pending_feedback,
                )
                .await?;

            if control == LoopControl::Stop {
                break;
            }
        }

        self.source.flush()?;
        self.observer.on_run_end(&totals);
        Ok(totals)
    }

    /// Create and check out the task branch when requested.
    fn enter_task_branch(&self, task: &Task, base: Option<&str>) -> Result<Option<String>> {
        let (Some(git), Some(base)) = (&self.git, base) else {
            return Ok(None);
        };
        let mut branch = format!("drover/{}", task.slug());
        if git.branch_exists(&branch)? {
            branch = format!("{}-{}", branch, &uuid::Uuid::new_v4().to_string()[..8]);
        }
        git.create_branch(&branch, base)?;
        git.checkout_branch(&branch)?;
        Ok(Some(branch))
    }

    /// Apply §4.3 disposition rules to one attempt outcome.
    async fn disposition(
        &mut self,
        task: &Task,
        outcome: AttemptOutcome,
        task_branch: Option<&str>,
        totals: &mut ExecutionResult,
        pending_feedback: &mut Vec<String>,
    ) -> Result<LoopControl> {
        let source_type = self.source.source_type().to_string();
        let scope = self.source.scope();

        match outcome {
            AttemptOutcome::Success(result) => {
                self.source.mark_complete(&task.id)?;
                self.deferred.clear(&source_type, &scope, &task.id)?;
                totals.record_success(&result);
                pending_feedback.clear();
                self.observer.on_task_end(task, &Disposition::Succeeded);

                if self.options.create_pr {
                    if let Some(branch) = task_branch {
                        create_pull_request(&self.workdir, branch, task).await;
                    }
                }
                if self.options.interactive {
                    if let Some(message) = prompt_followup(self.options.followup_timeout).await {
                        pending_feedback.push(message);
                    }
                }
                Ok(LoopControl::Continue)
            }
            AttemptOutcome::Retryable(error) => {
                let count = self.deferred.record_failure(&source_type, &scope, &task.id)?;
                totals.record_failure();
                if count >= self.policy.max_retries() {
                    // Retry budget spent across runs: give up on this task
                    // (left unchecked for a manual retry) and move on.
                    self.deferred.clear(&source_type, &scope, &task.id)?;
                    self.observer
                        .on_task_end(task, &Disposition::Failed { error });
                    Ok(LoopControl::Continue)
                } else {
                    // A still-active rate limit would fail the next task too;
                    // stopping avoids a bulk of fatal-looking log entries.
                    self.observer
                        .on_task_end(task, &Disposition::Deferred { error });
                    dlog_warn!(
                        "Stopping run early after retryable failure (deferral {}/{})",
                        count,
                        self.policy.max_retries()
                    );
                    Ok(LoopControl::Stop)
                }
            }
            AttemptOutcome::Fatal(error) => {
                totals.record_failure();
                self.observer
                    .on_task_end(task, &Disposition::Fatal { error: error.clone() });
                dlog_error!(
                    "Fatal engine failure, aborting run (check authentication/configuration): {}",
                    error
                );
                Ok(LoopControl::Stop)
            }
            AttemptOutcome::Unknown(error) => {
                totals.record_failure();
                self.observer
                    .on_task_end(task, &Disposition::Failed { error: error.clone() });
                dlog_error!(
                    "Unrecognized engine failure, stopping for inspection: {}",
                    error
                );
                Ok(LoopControl::Stop)
            }
        }
    }
}

/// Open a pull request for a completed task branch. Best effort: a missing
/// `gh` binary or a failed call is logged, never fails the run.
async fn create_pull_request(workdir: &std::path::Path, branch: &str, task: &Task) {
    if which::which("gh").is_err() {
        dlog_warn!("create_pr requested but `gh` not found on PATH");
        return;
    }
    let result = tokio::process::Command::new("gh")
        .args(["pr", "create", "--head", branch, "--title", &task.title])
        .arg("--body")
        .arg(task.body.as_deref().unwrap_or("Automated backlog task."))
        .current_dir(workdir)
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {
            dlog!("Opened pull request for {}", branch);
        }
        Ok(output) => {
            dlog_warn!(
                "gh pr create failed for {}: {}",
                branch,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Err(e) => dlog_warn!("gh pr create failed for {}: {}", branch, e),
    }
}

/// Read one follow-up line from stdin, auto-continuing after the inactivity
/// timeout so the loop is never parked on an absent operator.
async fn prompt_followup(timeout: Duration) -> Option<String> {
    println!(
        "Follow-up for the next task? (auto-continues in {}s)",
        timeout.as_secs()
    );
    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 && !line.trim().is_empty() => Some(line.trim().to_string()),
        _ => None,
    }
}
