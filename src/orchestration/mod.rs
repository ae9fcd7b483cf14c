//! Orchestration layer for drover.
//!
//! This module holds the task-execution core: the retry and model-fallback
//! policies, the persistent deferral tracker, the engine abstraction with
//! the Claude headless implementation, worker isolation, and the sequential
//! and parallel executors that drive a backlog through them.

mod attempt;
mod claude;
mod deferred;
mod engine;
mod fallback;
mod feedback;
mod isolation;
mod observer;
mod parallel;
mod retry;
mod sequential;

pub use attempt::{execute_with_retry, AttemptOutcome};
pub use claude::{ClaudeEngine, DEFAULT_TIMEOUT_SECS};
pub use deferred::{DeferredRecord, DeferredTaskTracker};
pub use engine::{AIEngine, EngineOptions, ProgressFn};
pub use fallback::{FallbackState, ModelFallbackManager};
pub use feedback::{FeedbackQueue, FeedbackSender, DEFAULT_CAPACITY};
pub use isolation::{IsolationHandle, IsolationProvider, WorktreeProvider};
pub use observer::{LogObserver, NullObserver, Observer};
pub use parallel::{ParallelExecutor, ParallelOptions};
pub use retry::{is_rate_limit, ErrorClass, RetryPolicy};
pub use sequential::{SequentialExecutor, SequentialOptions};
