//! Backlog storage abstraction.
//!
//! A `TaskSource` hides the backlog format (markdown checklist, issue
//! tracker, in-memory fixtures) behind a small trait the executors consume.
//! Completion is the only mutation the orchestrator performs, and a task is
//! marked complete exactly once, only after an observed engine success.

pub mod markdown;

use std::collections::HashSet;

use crate::core::{Task, TaskId};
use crate::Result;

pub use markdown::MarkdownSource;

/// Abstraction over backlog storage.
pub trait TaskSource {
    /// Short type tag, used to scope persisted deferral counters.
    fn source_type(&self) -> &str;

    /// Identity of the backing store (e.g. the PRD file path).
    fn scope(&self) -> String;

    /// The next task that has not been issued this run, if any.
    ///
    /// A task is issued at most once per source instance; failed tasks stay
    /// unchecked in the store so a later run can retry them.
    fn next_task(&mut self) -> Result<Option<Task>>;

    /// Number of incomplete tasks still in the store.
    fn count_remaining(&self) -> Result<usize>;

    /// Record a task as done in the backing store.
    fn mark_complete(&mut self, id: &TaskId) -> Result<()>;

    /// Flush any buffered writes. No-op for unbuffered sources.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Buffering decorator over any `TaskSource`.
///
/// Completion marks are held in memory and written through in one batch on
/// `flush()`. The executors see buffered marks reflected in `next_task` and
/// `count_remaining`, so the decorator is transparent to them.
pub struct CachedSource<S: TaskSource> {
    inner: S,
    pending: Vec<TaskId>,
    pending_set: HashSet<TaskId>,
}

impl<S: TaskSource> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            pending_set: HashSet::new(),
        }
    }

    /// Number of buffered completion marks.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<S: TaskSource> TaskSource for CachedSource<S> {
    fn source_type(&self) -> &str {
        self.inner.source_type()
    }

    fn scope(&self) -> String {
        self.inner.scope()
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        loop {
            match self.inner.next_task()? {
                Some(task) if self.pending_set.contains(&task.id) => continue,
                other => return Ok(other),
            }
        }
    }

    fn count_remaining(&self) -> Result<usize> {
        Ok(self
            .inner
            .count_remaining()?
            .saturating_sub(self.pending.len()))
    }

    fn mark_complete(&mut self, id: &TaskId) -> Result<()> {
        if self.pending_set.insert(id.clone()) {
            self.pending.push(id.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for id in self.pending.drain(..) {
            self.inner.mark_complete(&id)?;
        }
        self.pending_set.clear();
        self.inner.flush()
    }
}

impl<S: TaskSource> Drop for CachedSource<S> {
    fn drop(&mut self) {
        // Best effort; callers that care about errors flush explicitly.
        let _ = self.flush();
    }
}
