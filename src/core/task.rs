//! Task data model for backlog execution.
//!
//! Tasks are the atomic units of backlog work handed to the executors.
//! They are created by a `TaskSource`, immutable once issued, and marked
//! complete only by the orchestrator calling back into the source.

use serde::{Deserialize, Serialize};

use crate::util::slugify;

/// Unique identifier for a task within its source.
///
/// Derived from the source (e.g. the checklist line in a PRD file), so it is
/// stable across runs — the deferred-retry tracker depends on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single unit of backlog work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier within the source.
    pub id: TaskId,
    /// Human-readable one-line title.
    pub title: String,
    /// Optional longer description.
    pub body: Option<String>,
    /// Ordering partition: tasks in the same group may run concurrently; a
    /// group only starts once the prior group is fully dispositioned.
    pub parallel_group: Option<u32>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: None,
            parallel_group: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.parallel_group = Some(group);
        self
    }

    /// Branch-safe short name for this task.
    pub fn slug(&self) -> String {
        slugify(&self.title, 40)
    }

    /// Group key used for partitioning; ungrouped tasks form group 0.
    pub fn group_key(&self) -> u32 {
        self.parallel_group.unwrap_or(0)
    }
}

impl From<&str> for Task {
    fn from(title: &str) -> Self {
        Self::new(title, title)
    }
}

/// Terminal disposition of a dispatched task.
///
/// `Pending → Dispatched → {Succeeded | Deferred | Failed | Fatal}`; the
/// executors report the terminal state through the `Observer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Engine reported success; task marked complete in its source.
    Succeeded,
    /// Retryable failure recorded for a later run; task left unchecked.
    Deferred { error: String },
    /// Definitive failure; task left unchecked for manual retry.
    Failed { error: String },
    /// Irrecoverable configuration failure; the run aborts.
    Fatal { error: String },
}

impl Disposition {
    pub fn is_success(&self) -> bool {
        matches!(self, Disposition::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Disposition::Succeeded => None,
            Disposition::Deferred { error }
            | Disposition::Failed { error }
            | Disposition::Fatal { error } => Some(error),
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Succeeded => write!(f, "succeeded"),
            Disposition::Deferred { error } => write!(f, "deferred: {}", error),
            Disposition::Failed { error } => write!(f, "failed: {}", error),
            Disposition::Fatal { error } => write!(f, "fatal: {}", error),
        }
    }
}
