//! Engine invocation results and run totals.

use serde::{Deserialize, Serialize};

/// Outcome of a single engine invocation.
///
/// Produced once per invocation and never mutated; the executors consume it
/// to decide the task's disposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResult {
    /// Whether the engine reported the task as done.
    pub success: bool,
    /// The engine's final response text.
    pub response: String,
    /// Tokens consumed by the invocation.
    pub input_tokens: u64,
    /// Tokens produced by the invocation.
    pub output_tokens: u64,
    /// Cost in USD, when the engine reports one.
    pub cost_usd: Option<f64>,
    /// Error text, when the invocation failed.
    pub error: Option<String>,
}

impl AIResult {
    /// A successful result with the given response text.
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: None,
            error: None,
        }
    }

    /// A failed result carrying an error message.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: None,
            error: Some(error.into()),
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    /// The error message, or a placeholder when none was recorded.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown engine failure")
    }
}

/// Running totals for one orchestrator run.
///
/// Owned exclusively by the active run, accumulated monotonically, and
/// returned to the caller at loop exit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a successful engine result into the totals.
    pub fn record_success(&mut self, result: &AIResult) {
        self.tasks_completed += 1;
        self.total_input_tokens += result.input_tokens;
        self.total_output_tokens += result.output_tokens;
    }

    /// Count a task that reached a terminal failure this run.
    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    /// Fold another run summary into this one (parallel group aggregation).
    pub fn absorb(&mut self, other: &ExecutionResult) {
        self.tasks_completed += other.tasks_completed;
        self.tasks_failed += other.tasks_failed;
        self.total_input_tokens += other.total_input_tokens;
        self.total_output_tokens += other.total_output_tokens;
    }

    /// Process exit code derived from the run: nonzero iff anything failed.
    pub fn exit_code(&self) -> i32 {
        if self.tasks_failed > 0 {
            1
        } else {
            0
        }
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} completed, {} failed ({} in / {} out tokens)",
            self.tasks_completed,
            self.tasks_failed,
            self.total_input_tokens,
            self.total_output_tokens
        )
    }
}
