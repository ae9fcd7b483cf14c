//! Claude Code headless engine.
//!
//! Runs the `claude` binary in non-interactive mode (`-p` flag) with JSON
//! output and parses the response into an `AIResult`. The JSON shape varies
//! across CLI versions, so parsing sniffs a few tagged layouts here rather
//! than leaking that mess into the orchestrators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::AIResult;
use crate::error::{Error, Result};
use crate::{dlog_debug, dlog_trace};

use super::engine::{AIEngine, EngineOptions};

/// Default timeout for an engine invocation (20 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 1200;

/// Token usage block, present in newer CLI versions.
#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Internal struct for deserializing the Claude JSON response.
#[derive(Debug, Deserialize)]
struct RawResponse {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    is_error: Option<bool>,
    total_cost_usd: Option<f64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

/// Claude Code headless executor.
#[derive(Debug, Clone)]
pub struct ClaudeEngine {
    /// Path to the Claude binary.
    binary: PathBuf,
    /// Timeout for a single invocation.
    timeout: Duration,
}

impl ClaudeEngine {
    /// Create an executor, detecting the binary on PATH.
    pub fn new() -> Result<Self> {
        Self::with_command("claude")
    }

    /// Create an executor for a configured command name.
    pub fn with_command(command: &str) -> Result<Self> {
        let binary = which::which(command)
            .map_err(|_| Error::EngineBinaryNotFound(command.to_string()))?;
        Ok(Self {
            binary,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Create an executor with an explicit binary path (tests, non-standard
    /// install locations).
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Parse a JSON response body into an `AIResult`.
    pub fn parse_response(json_str: &str) -> Result<AIResult> {
        let raw: RawResponse = serde_json::from_str(json_str)?;
        let (input_tokens, output_tokens) = raw
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        let failed = raw.is_error.unwrap_or(false)
            || raw.subtype.as_deref().map(|s| s != "success").unwrap_or(false);

        let mut result = if failed {
            let message = raw
                .error
                .or(raw.result)
                .unwrap_or_else(|| "unknown engine failure".to_string());
            AIResult::err(message)
        } else if let Some(error) = raw.error {
            AIResult::err(error)
        } else if let Some(text) = raw.result {
            AIResult::ok(text)
        } else {
            AIResult::err("unrecognized response format")
        };

        result = result.with_tokens(input_tokens, output_tokens);
        if let Some(cost) = raw.total_cost_usd {
            result = result.with_cost(cost);
        }
        Ok(result)
    }
}

#[async_trait]
impl AIEngine for ClaudeEngine {
    fn name(&self) -> &str {
        "claude"
    }

    async fn execute(
        &self,
        prompt: &str,
        workdir: &Path,
        options: &EngineOptions,
    ) -> Result<AIResult> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json");
        if let Some(model) = &options.model_override {
            command.arg("--model").arg(model);
        }
        for arg in &options.engine_args {
            command.arg(arg);
        }
        command.current_dir(workdir);

        dlog_debug!(
            "ClaudeEngine::execute model={:?} workdir={}",
            options.model_override,
            workdir.display()
        );

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::EngineBinaryNotFound(self.binary.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        dlog_trace!("claude stdout: {}", stdout);

        // Try the JSON shape first; the CLI sometimes prints plain text on
        // hard failures.
        if let Ok(result) = Self::parse_response(&stdout) {
            return Ok(result);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "engine exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(AIResult::err(message));
        }

        Ok(AIResult::ok(stdout.trim().to_string()))
    }
}
