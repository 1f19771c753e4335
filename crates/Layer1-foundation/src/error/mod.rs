//! Error types for ncluster
//!
//! All errors are managed centrally here. Command-level failures carry enough
//! detail (exit code, command, captured output) to diagnose without
//! re-querying the task.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// ncluster error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Backend / provisioning
    // ========================================================================
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Provisioning failed: {0}")]
    Provision(String),

    // ========================================================================
    // Command lifecycle
    // ========================================================================
    #[error("State error: {0}")]
    State(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Timeout: task {task} still running `{command}` after {:.1}s", waited.as_secs_f64())]
    Timeout {
        task: String,
        command: String,
        waited: Duration,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    // ========================================================================
    // File transfer
    // ========================================================================
    #[error("Transfer error: {0}")]
    Transfer(String),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Misc
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a provisioning call that produced this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provision(_) | Error::Backend(_) | Error::Io(_))
    }

    /// Exit code of the failed command, if this is a command failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Execution(e) => Some(e.exit_code),
            _ => None,
        }
    }

    /// Whether this error is a join/wait deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Timeout helper
    pub fn timeout(task: impl Into<String>, command: impl Into<String>, waited: Duration) -> Self {
        Error::Timeout {
            task: task.into(),
            command: command.into(),
            waited,
        }
    }
}

// ============================================================================
// ExecutionError
// ============================================================================

/// A command finished with a non-zero exit code, or its channel failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    /// Name of the task that ran the command
    pub task: String,
    /// Command text as submitted
    pub command: String,
    /// Exit code (synthetic for channel failures)
    pub exit_code: i32,
    /// Captured output
    pub output: String,
    /// Transport-level error message, if the channel failed
    pub channel_error: Option<String>,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command `{}` on task {} returned status {}",
            self.command, self.task, self.exit_code
        )?;
        if let Some(err) = &self.channel_error {
            write!(f, " ({})", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

// ============================================================================
// AggregateError
// ============================================================================

/// One failed member of a job-level operation
#[derive(Debug)]
pub struct TaskFailure {
    /// Zero-based task index in the job
    pub index: usize,
    /// Task name
    pub task: String,
    /// What went wrong on that task
    pub error: Box<Error>,
}

/// Job-level failure: every failed task, in task order
#[derive(Debug)]
pub struct AggregateError {
    /// Job name
    pub job: String,
    /// Number of tasks the operation was applied to
    pub total: usize,
    /// Failures in task insertion order
    pub failures: Vec<TaskFailure>,
}

impl AggregateError {
    /// Indices of the failed tasks
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    /// `(index, exit_code)` pairs for failures that carry an exit code
    pub fn exit_codes(&self) -> Vec<(usize, i32)> {
        self.failures
            .iter()
            .filter_map(|f| f.error.exit_code().map(|code| (f.index, code)))
            .collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {}: {} of {} tasks failed",
            self.job,
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "\n  [{}] {}: {}", failure.index, failure.task, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

// ============================================================================
// From impls
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
