//! Shared fixtures: a scripted mock engine, an in-memory task source, and
//! git repository scaffolding.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use git2::{IndexAddOption, Repository, Signature};
use tempfile::TempDir;

use drover::core::{AIResult, Task, TaskId};
use drover::git::GitOps;
use drover::orchestration::{AIEngine, EngineOptions};
use drover::source::TaskSource;
use drover::Result;

/// Per-task script for the mock engine.
#[derive(Debug, Default)]
pub struct TaskScript {
    pub results: VecDeque<AIResult>,
    pub delay: Option<Duration>,
    /// File written into the workdir before a successful result resolves,
    /// standing in for the agent's code changes.
    pub writes: Option<(String, String)>,
}

/// Scripted engine double.
///
/// Behaviors are keyed by task title (extracted from the prompt's
/// `Task:` line); unscripted tasks succeed with fixed token counts.
pub struct MockEngine {
    scripts: Mutex<HashMap<String, TaskScript>>,
    default: AIResult,
    inflight: AtomicUsize,
    pub max_inflight: AtomicUsize,
    /// Titles in invocation-start order.
    pub calls: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn ok() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: AIResult::ok("done").with_tokens(10, 5),
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, result: AIResult) -> Self {
        self.default = result;
        self
    }

    pub fn with_results(self, title: &str, results: Vec<AIResult>) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.entry(title.to_string()).or_default().results = results.into();
        }
        self
    }

    pub fn with_delay(self, title: &str, delay: Duration) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.entry(title.to_string()).or_default().delay = Some(delay);
        }
        self
    }

    pub fn with_write(self, title: &str, file: &str, content: &str) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.entry(title.to_string()).or_default().writes =
                Some((file.to_string(), content.to_string()));
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AIEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(
        &self,
        prompt: &str,
        workdir: &Path,
        _options: &EngineOptions,
    ) -> Result<AIResult> {
        let title = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Task: "))
            .unwrap_or("?")
            .to_string();
        self.calls.lock().unwrap().push(title.clone());

        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(current, Ordering::SeqCst);

        let (delay, result, writes) = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&title) {
                Some(script) => (
                    script.delay,
                    script
                        .results
                        .pop_front()
                        .unwrap_or_else(|| self.default.clone()),
                    script.writes.clone(),
                ),
                None => (None, self.default.clone(), None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if result.success {
            if let Some((file, content)) = writes {
                std::fs::write(workdir.join(file), content)?;
            }
        }

        self.inflight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// In-memory task source with optional parallel groups.
pub struct VecSource {
    pub tasks: Vec<Task>,
    pub complete: HashSet<TaskId>,
    issued: HashSet<TaskId>,
}

impl VecSource {
    pub fn new(titles: &[&str]) -> Self {
        Self {
            tasks: titles.iter().map(|t| Task::from(*t)).collect(),
            complete: HashSet::new(),
            issued: HashSet::new(),
        }
    }

    pub fn with_groups(entries: &[(&str, u32)]) -> Self {
        Self {
            tasks: entries
                .iter()
                .map(|(title, group)| Task::from(*title).with_group(*group))
                .collect(),
            complete: HashSet::new(),
            issued: HashSet::new(),
        }
    }

    pub fn is_complete(&self, title: &str) -> bool {
        self.complete.contains(&TaskId::new(title))
    }
}

impl TaskSource for VecSource {
    fn source_type(&self) -> &str {
        "vec"
    }

    fn scope(&self) -> String {
        "memory".to_string()
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        let next = self
            .tasks
            .iter()
            .find(|t| !self.complete.contains(&t.id) && !self.issued.contains(&t.id))
            .cloned();
        if let Some(ref task) = next {
            self.issued.insert(task.id.clone());
        }
        Ok(next)
    }

    fn count_remaining(&self) -> Result<usize> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| !self.complete.contains(&t.id))
            .count())
    }

    fn mark_complete(&mut self, id: &TaskId) -> Result<()> {
        self.complete.insert(id.clone());
        Ok(())
    }
}

/// Initialize a git repository with one commit and return its GitOps handle.
pub fn init_repo() -> (TempDir, GitOps, String) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    {
        let sig = Signature::now("Test", "test@example.com").unwrap();
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["."].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }
    let ops = GitOps::new(dir.path()).unwrap();
    let base = ops.current_head().unwrap();
    (dir, ops, base)
}
