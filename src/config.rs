use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{dlog_debug, Error, Result};

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_fallback_retry_interval_secs() -> u64 {
    300
}

fn default_max_parallel() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model requested while the engine is healthy.
    pub model: Option<String>,
    /// Model substituted after rate-limit signals.
    pub fallback_model: Option<String>,
    /// Attempts per task before a retryable failure surfaces.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Spacing between retry attempts, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Cooldown before optimistically retrying the primary model, in seconds.
    #[serde(default = "default_fallback_retry_interval_secs")]
    pub fallback_retry_interval_secs: u64,
    /// Whether a rate-limited fallback model is itself retried after the
    /// cooldown, or left stalled for a human to look at.
    #[serde(default)]
    pub retry_in_fallback: bool,
    /// Worker count for parallel runs.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Open a pull request for each completed task branch.
    #[serde(default)]
    pub create_pr: bool,
    pub worktree_dir: Option<String>,
    pub command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: None,
            fallback_model: None,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            fallback_retry_interval_secs: default_fallback_retry_interval_secs(),
            retry_in_fallback: false,
            max_parallel: default_max_parallel(),
            create_pr: false,
            worktree_dir: None,
            command: None,
        }
    }
}

impl Config {
    pub fn drover_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".drover"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::drover_dir()?.join("drover.toml"))
    }

    pub fn deferred_path() -> Result<PathBuf> {
        Ok(Self::drover_dir()?.join("deferred.json"))
    }

    pub fn worktrees_dir() -> Result<PathBuf> {
        let config = Self::load()?;
        match config.worktree_dir {
            Some(dir) => Ok(expand_tilde(&dir)),
            None => Ok(Self::drover_dir()?.join("worktrees")),
        }
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn fallback_retry_interval(&self) -> Duration {
        Duration::from_secs(self.fallback_retry_interval_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        dlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            dlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        dlog_debug!(
            "Config loaded: model={:?}, fallback={:?}, max_retries={}, max_parallel={}",
            config.model,
            config.fallback_model,
            config.max_retries,
            config.max_parallel
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let drover_dir = Self::drover_dir()?;
        if !drover_dir.exists() {
            fs::create_dir_all(&drover_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        dlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let drover_dir = Self::drover_dir()?;
        let worktrees_dir = Self::worktrees_dir()?;
        if !drover_dir.exists() {
            dlog_debug!("Creating drover directory: {}", drover_dir.display());
            fs::create_dir_all(&drover_dir)?;
        }
        if !worktrees_dir.exists() {
            dlog_debug!("Creating worktrees directory: {}", worktrees_dir.display());
            fs::create_dir_all(&worktrees_dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
