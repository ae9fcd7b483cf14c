//! Markdown checklist backlog.
//!
//! Reads tasks from `- [ ]` checklist items in a PRD file and rewrites them
//! to `- [x]` on completion. An optional `[group:N]` tag on an item assigns
//! it to a parallel group; indented lines below an item become its body.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::core::{Task, TaskId};
use crate::util::slugify;
use crate::{dlog_debug, Error, Result};

fn checkbox_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*]\s*\[( |x|X)\]\s*(.+?)\s*$").expect("valid regex"))
}

fn group_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\[group:(\d+)\]\s*").expect("valid regex"))
}

/// One parsed checklist item.
#[derive(Debug, Clone)]
struct Item {
    task: Task,
    line: usize,
    checked: bool,
}

/// Checklist-backed task source.
///
/// The file is re-read on every call so external edits (a human checking
/// items off mid-run) are picked up. Tasks issued by `next_task` are
/// remembered for the lifetime of this instance so a failed task is not
/// re-issued within the same run.
pub struct MarkdownSource {
    path: PathBuf,
    issued: HashSet<TaskId>,
}

impl MarkdownSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::TaskSource(format!(
                "backlog file not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            issued: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self) -> Result<Vec<Item>> {
        let content = fs::read_to_string(&self.path)?;
        Ok(parse_items(&content))
    }
}

fn parse_items(content: &str) -> Vec<Item> {
    let lines: Vec<&str> = content.lines().collect();
    let mut items = Vec::new();
    let mut ordinal = 0usize;

    for (lineno, line) in lines.iter().enumerate() {
        let Some(caps) = checkbox_re().captures(line) else {
            continue;
        };
        ordinal += 1;
        let checked = &caps[1] != " ";
        let raw_title = caps[2].to_string();

        let (title, group) = match group_tag_re().captures(&raw_title) {
            Some(tag) => {
                let group = tag[1].parse::<u32>().ok();
                (group_tag_re().replace(&raw_title, " ").trim().to_string(), group)
            }
            None => (raw_title, None),
        };

        // Indented lines below the item, up to the next checklist entry or
        // unindented text, form the body.
        let mut body_lines = Vec::new();
        for follow in lines.iter().skip(lineno + 1) {
            if follow.trim().is_empty() {
                break;
            }
            if checkbox_re().is_match(follow) || !follow.starts_with("  ") {
                break;
            }
            body_lines.push(follow.trim());
        }

        let id = TaskId::new(format!("{:03}-{}", ordinal, slugify(&title, 40)));
        let mut task = Task::new(id, title);
        if let Some(g) = group {
            task = task.with_group(g);
        }
        if !body_lines.is_empty() {
            task = task.with_body(body_lines.join("\n"));
        }
        items.push(Item {
            task,
            line: lineno,
            checked,
        });
    }

    items
}

impl super::TaskSource for MarkdownSource {
    fn source_type(&self) -> &str {
        "markdown"
    }

    fn scope(&self) -> String {
        self.path.display().to_string()
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        let next = self
            .parse()?
            .into_iter()
            .find(|item| !item.checked && !self.issued.contains(&item.task.id))
            .map(|item| item.task);
        if let Some(ref task) = next {
            self.issued.insert(task.id.clone());
            dlog_debug!("MarkdownSource issued task {}", task.id);
        }
        Ok(next)
    }

    fn count_remaining(&self) -> Result<usize> {
        Ok(self.parse()?.iter().filter(|item| !item.checked).count())
    }

    fn mark_complete(&mut self, id: &TaskId) -> Result<()> {
        let items = self.parse()?;
        let item = items
            .iter()
            .find(|item| &item.task.id == id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        let content = fs::read_to_string(&self.path)?;
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let line = &lines[item.line];
        let updated = line.replacen("[ ]", "[x]", 1);
        if updated == *line {
            // Already checked; marking complete twice is a caller bug but not
            // worth failing the run over.
            dlog_debug!("mark_complete: {} already checked", id);
            return Ok(());
        }
        lines[item.line] = updated;
        let mut output = lines.join("\n");
        if content.ends_with('\n') {
            output.push('\n');
        }
        fs::write(&self.path, output)?;
        dlog_debug!("MarkdownSource marked {} complete", id);
        Ok(())
    }
}
