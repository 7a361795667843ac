//! Error taxonomy for the analysis pipeline.
//!
//! Component boundaries return these typed errors so the orchestrator can
//! decide between a per-item warning, a partial stage, and a terminal
//! event. Application plumbing (config loading, CLI, server start-up) keeps
//! using `anyhow`.

use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a rate-limiter token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// The run was cancelled while waiting.
    #[error("rate limiter wait cancelled")]
    Cancelled,
    /// Waiting for the next token would pass the run deadline.
    #[error("rate limiter wait of {wait:?} would exceed the run deadline")]
    DeadlineExceeded { wait: Duration },
}

/// Failure of a single LLM operation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered with a non-success status.
    #[error("provider error {status}: {message}")]
    Provider { status: u16, message: String },
    /// Transport-level failure (connect, reset, timeout).
    #[error("provider network error: {0}")]
    Network(String),
    /// The response body was not valid JSON.
    #[error("unparseable LLM response: {0}")]
    Parse(String),
    /// The response was JSON but did not match the expected shape.
    #[error("LLM response violates schema: {0}")]
    Schema(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("LLM request cancelled")]
    Cancelled,
    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),
}

impl LlmError {
    /// True when the error came from cancellation or the run deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            LlmError::Cancelled
                | LlmError::RateLimited(RateLimitError::Cancelled)
                | LlmError::RateLimited(RateLimitError::DeadlineExceeded { .. })
        )
    }
}

/// Reducer-level failure of the DDL fold.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DdlError {
    #[error("no tables could be extracted from {migrations} migration(s)")]
    NoSchemaExtracted { migrations: usize },
}

/// Failure that ends a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("analysis cancelled")]
    Cancelled,
    /// Bad input: unreadable root, no files matched, invalid target.
    #[error("invalid input: {0}")]
    Input(String),
    #[error("crawl failed: {0:#}")]
    Crawl(anyhow::Error),
    #[error("repository checkout failed: {0}")]
    Clone(#[from] CloneError),
    /// The progress consumer went away.
    #[error("progress consumer disconnected")]
    ProgressClosed,
}

/// Failure to fetch a remote repository.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),
    #[error("repository is private or credentials were rejected: {0}")]
    PrivateRepository(String),
    #[error("git failed: {0}")]
    Git(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
