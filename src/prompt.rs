//! Task prompt framing.
//!
//! Prompt text is deliberately boring: the task's own words plus any
//! accumulated operator feedback. The orchestrators treat it as opaque.

use crate::core::Task;

/// Build the engine prompt for one task, folding in operator feedback
/// accumulated since the last dispatch.
pub fn build_prompt(task: &Task, feedback: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are completing one task from this repository's backlog.\n\n");
    prompt.push_str(&format!("Task: {}\n", task.title));
    if let Some(body) = &task.body {
        prompt.push('\n');
        prompt.push_str(body);
        prompt.push('\n');
    }
    if !feedback.is_empty() {
        prompt.push_str("\nOperator guidance since the last task:\n");
        for message in feedback {
            prompt.push_str(&format!("- {}\n", message));
        }
    }
    prompt.push_str(
        "\nWork autonomously, keep changes scoped to this task, and commit your work when done.\n",
    );
    prompt
}
