//! The per-task attempt loop shared by both executors.
//!
//! Two deliberate retry layers: the `RetryPolicy` governs how many attempts
//! a task gets and how they are spaced, while the `ModelFallbackManager`
//! decides which model each attempt requests. A rate-limit switch re-raises
//! into the surrounding retry immediately (no backoff sleep), and every
//! attempt re-resolves the current model because the right target may have
//! changed mid-retry.

use std::path::Path;

use crate::core::AIResult;
use crate::error::Error;
use crate::{dlog_debug, dlog_warn};

use super::engine::{AIEngine, EngineOptions};
use super::fallback::ModelFallbackManager;
use super::retry::{ErrorClass, RetryPolicy};

/// Terminal outcome of one task's attempt loop.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The engine reported success.
    Success(AIResult),
    /// Every attempt failed with transient errors.
    Retryable(String),
    /// Irrecoverable configuration failure.
    Fatal(String),
    /// Unrecognized failure; needs a human.
    Unknown(String),
}

/// Run the engine for one task until success or the attempt budget is spent.
pub async fn execute_with_retry<E: AIEngine + ?Sized>(
    engine: &E,
    prompt: &str,
    workdir: &Path,
    engine_args: &[String],
    policy: &RetryPolicy,
    fallback: &mut ModelFallbackManager,
) -> AttemptOutcome {
    let mut last_error = String::new();

    for attempt in 1..=policy.max_retries() {
        let model = fallback.current_model();
        let options = EngineOptions {
            model_override: model.clone(),
            engine_args: engine_args.to_vec(),
        };
        dlog_debug!(
            "Engine attempt {}/{} model={:?}",
            attempt,
            policy.max_retries(),
            model
        );

        let error_text = match engine.execute(prompt, workdir, &options).await {
            Ok(result) if result.success => {
                fallback.record_success(model.as_deref());
                return AttemptOutcome::Success(result);
            }
            Ok(result) => result.error_message().to_string(),
            Err(Error::EngineBinaryNotFound(binary)) => {
                return AttemptOutcome::Fatal(format!("engine binary not found: {}", binary));
            }
            Err(e) => e.to_string(),
        };

        last_error = error_text;
        match policy.classify(&last_error) {
            ErrorClass::Fatal => return AttemptOutcome::Fatal(last_error),
            ErrorClass::Unknown => return AttemptOutcome::Unknown(last_error),
            ErrorClass::Retryable => {
                let switch_now = fallback.handle_error(&last_error);
                if attempt < policy.max_retries() {
                    if switch_now {
                        dlog_debug!("Retrying immediately with fallback model");
                    } else {
                        let delay = policy.backoff(attempt);
                        dlog_warn!(
                            "Attempt {} failed ({}), retrying in {:?}",
                            attempt,
                            crate::util::truncate(&last_error, 80),
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    AttemptOutcome::Retryable(last_error)
}
