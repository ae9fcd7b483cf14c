//! Run lifecycle observers.
//!
//! Notification side channels are explicit collaborators injected into the
//! executors, not process-wide singletons. Implementations must be cheap:
//! callbacks run on the orchestrator's loop.

use crate::core::{Disposition, ExecutionResult, Task};
use crate::util::truncate;
use crate::{dlog, dlog_error, dlog_warn};

pub trait Observer: Send + Sync {
    fn on_task_start(&self, task: &Task);
    fn on_task_end(&self, task: &Task, disposition: &Disposition);
    fn on_run_end(&self, result: &ExecutionResult);
}

/// Observer that discards everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_task_start(&self, _task: &Task) {}
    fn on_task_end(&self, _task: &Task, _disposition: &Disposition) {}
    fn on_run_end(&self, _result: &ExecutionResult) {}
}

/// Observer that writes through the log module.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_task_start(&self, task: &Task) {
        dlog!("Task {} started: {}", task.id, truncate(&task.title, 60));
    }

    fn on_task_end(&self, task: &Task, disposition: &Disposition) {
        match disposition {
            Disposition::Succeeded => dlog!("Task {} succeeded", task.id),
            Disposition::Deferred { error } => {
                dlog_warn!("Task {} deferred: {}", task.id, truncate(error, 120))
            }
            Disposition::Failed { error } => {
                dlog_error!("Task {} failed: {}", task.id, truncate(error, 120))
            }
            Disposition::Fatal { error } => dlog_error!(
                "Task {} hit a fatal error (check authentication/configuration): {}",
                task.id,
                truncate(error, 120)
            ),
        }
    }

    fn on_run_end(&self, result: &ExecutionResult) {
        dlog!("Run finished: {}", result);
    }
}
