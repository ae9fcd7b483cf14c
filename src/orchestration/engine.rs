//! External task-execution engine abstraction.
//!
//! The engine is an opaque process that attempts one backlog task given a
//! prompt. The orchestrators never look at its output beyond the structured
//! `AIResult`; parsing the engine's wire format is the implementation's
//! problem (see `claude.rs`).

use std::path::Path;

use async_trait::async_trait;

use crate::core::AIResult;
use crate::Result;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Model to request instead of the engine's default.
    pub model_override: Option<String>,
    /// Extra arguments appended to the engine command line.
    pub engine_args: Vec<String>,
}

impl EngineOptions {
    pub fn with_model(model: Option<String>) -> Self {
        Self {
            model_override: model,
            engine_args: Vec::new(),
        }
    }
}

/// Progress callback for streaming engines: `(step, raw_line)`.
pub type ProgressFn<'a> = dyn FnMut(&str, Option<&str>) + Send + 'a;

#[async_trait]
pub trait AIEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run the engine once in `workdir` and return its structured result.
    ///
    /// Infrastructure failures (spawn errors, timeouts) surface as `Err`;
    /// failures the engine itself reports come back as an `AIResult` with
    /// `success == false` and an error message to classify.
    async fn execute(
        &self,
        prompt: &str,
        workdir: &Path,
        options: &EngineOptions,
    ) -> Result<AIResult>;

    /// Streaming variant; `on_progress` may be invoked zero or more times
    /// before resolution. The default implementation does not stream — the
    /// orchestrators must work correctly either way.
    async fn execute_streaming(
        &self,
        prompt: &str,
        workdir: &Path,
        on_progress: &mut ProgressFn<'_>,
        options: &EngineOptions,
    ) -> Result<AIResult> {
        on_progress("execute", None);
        self.execute(prompt, workdir, options).await
    }
}
