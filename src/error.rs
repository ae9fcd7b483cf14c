use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task source error: {0}")]
    TaskSource(String),

    #[error("Task not found in source: {0}")]
    TaskNotFound(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Engine binary not found: {0}")]
    EngineBinaryNotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Merge conflict on branch {branch}: {files:?}")]
    MergeConflict { branch: String, files: Vec<String> },

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Fatal engine failure (check authentication/configuration): {0}")]
    Fatal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Feedback queue is full")]
    FeedbackQueueFull,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
