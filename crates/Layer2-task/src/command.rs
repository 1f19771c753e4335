//! Command handle - lifecycle tracker for one submitted command
//!
//! A `CommandHandle` is a future-like view of one shell invocation. The
//! session that executes the command drives the state machine through
//! `mark_running` / `complete` / `fail_channel`; callers observe it through
//! `status`, `wait` and `result`.

use crate::log::{OutputBuffer, OutputLine};
use crate::session::Session;
use crate::state::{CommandStatus, WaitStatus, CHANNEL_FAILURE_EXIT_CODE};
use chrono::{DateTime, Utc};
use ncluster_foundation::{Error, ExecutionError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Observable lifecycle fields, published through a watch channel
#[derive(Debug, Clone)]
struct Lifecycle {
    status: CommandStatus,
    exit_code: Option<i32>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

struct CommandRecord {
    seq: u64,
    task: String,
    command: String,
    created_at: DateTime<Utc>,
    state: watch::Sender<Lifecycle>,
    output: Mutex<OutputBuffer>,
}

/// Handle to one in-flight or completed command
#[derive(Clone)]
pub struct CommandHandle {
    inner: Arc<CommandRecord>,
}

impl CommandHandle {
    /// Create a handle in `Pending`
    pub fn new(
        task: impl Into<String>,
        seq: u64,
        command: impl Into<String>,
        max_output_bytes: usize,
    ) -> Self {
        let (state, _) = watch::channel(Lifecycle {
            status: CommandStatus::Pending,
            exit_code: None,
            started_at: None,
            ended_at: None,
            error: None,
        });

        Self {
            inner: Arc::new(CommandRecord {
                seq,
                task: task.into(),
                command: command.into(),
                created_at: Utc::now(),
                state,
                output: Mutex::new(OutputBuffer::new(max_output_bytes)),
            }),
        }
    }

    /// Hand the command to `session`; it is `Running` once accepted.
    /// A rejected submission fails the handle as a channel error.
    pub fn start(&self, session: &dyn Session) -> Result<()> {
        if let Err(e) = session.submit(self) {
            self.fail_channel(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // Transitions (driven by the session)
    // ========================================================================

    /// `Pending -> Running`. Returns false if the handle was not pending.
    pub fn mark_running(&self) -> bool {
        self.inner.state.send_if_modified(|s| {
            if s.status != CommandStatus::Pending {
                return false;
            }
            s.status = CommandStatus::Running;
            s.started_at = Some(Utc::now());
            true
        })
    }

    /// Record the command's exit code. Ignored once terminal.
    pub fn complete(&self, exit_code: i32) -> bool {
        self.finish(exit_code, None)
    }

    /// Record a transport-level failure as `Failed` with a synthetic code.
    /// Ignored once terminal.
    pub fn fail_channel(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let changed = self.finish(CHANNEL_FAILURE_EXIT_CODE, Some(message.clone()));
        if changed {
            self.inner.output.lock().push_system(message);
        }
        changed
    }

    fn finish(&self, exit_code: i32, error: Option<String>) -> bool {
        self.inner.state.send_if_modified(|s| {
            if s.status.is_terminal() {
                return false;
            }
            let now = Utc::now();
            s.status = if error.is_some() {
                CommandStatus::Failed
            } else {
                CommandStatus::from_exit_code(exit_code)
            };
            s.exit_code = Some(exit_code);
            s.started_at.get_or_insert(now);
            s.ended_at = Some(now);
            s.error = error;
            true
        })
    }

    /// Append one line of captured output
    pub fn push_output(&self, line: impl Into<String>) {
        self.inner.output.lock().push_output(line);
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Wait until terminal, or until `timeout` elapses.
    ///
    /// Expiry returns `WaitStatus::StillRunning` and leaves the command alone.
    pub async fn wait(&self, timeout: Option<Duration>) -> WaitStatus {
        match timeout {
            None => WaitStatus::Finished(self.wait_terminal().await),
            Some(limit) => match tokio::time::timeout(limit, self.wait_terminal()).await {
                Ok(status) => WaitStatus::Finished(status),
                Err(_) => WaitStatus::StillRunning,
            },
        }
    }

    async fn wait_terminal(&self) -> CommandStatus {
        let mut rx = self.inner.state.subscribe();
        let result = rx.wait_for(|s| s.status.is_terminal()).await;
        match result {
            Ok(state) => state.status,
            // The sender lives inside this handle, so it cannot be gone
            Err(_) => self.status(),
        }
    }

    /// Exit code of a terminal command
    pub fn result(&self) -> Result<i32> {
        let state = self.inner.state.borrow();
        match (state.status.is_terminal(), state.exit_code) {
            (true, Some(code)) => Ok(code),
            _ => Err(Error::State(format!(
                "command `{}` on task {} is {}",
                self.inner.command, self.inner.task, state.status
            ))),
        }
    }

    /// Failure details, if the command failed
    pub fn execution_error(&self) -> Option<ExecutionError> {
        let (status, exit_code, error) = {
            let state = self.inner.state.borrow();
            (state.status, state.exit_code, state.error.clone())
        };
        if status != CommandStatus::Failed {
            return None;
        }
        Some(ExecutionError {
            task: self.inner.task.clone(),
            command: self.inner.command.clone(),
            exit_code: exit_code.unwrap_or(CHANNEL_FAILURE_EXIT_CODE),
            output: self.output(),
            channel_error: error,
        })
    }

    pub fn status(&self) -> CommandStatus {
        self.inner.state.borrow().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.state.borrow().exit_code
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().ended_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Wall time since start (or total, once terminal)
    pub fn duration(&self) -> Option<Duration> {
        let state = self.inner.state.borrow();
        let start = state.started_at?;
        let end = state.ended_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// 1-based invocation number on the owning task
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    pub fn task_name(&self) -> &str {
        &self.inner.task
    }

    /// Captured output so far
    pub fn output(&self) -> String {
        self.inner.output.lock().text()
    }

    pub fn output_truncated(&self) -> bool {
        self.inner.output.lock().is_truncated()
    }

    /// Receive output lines as they arrive
    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputLine> {
        self.inner.output.lock().subscribe()
    }

    pub fn snapshot(&self) -> CommandSnapshot {
        let state = self.inner.state.borrow().clone();
        CommandSnapshot {
            seq: self.inner.seq,
            task: self.inner.task.clone(),
            command: self.inner.command.clone(),
            status: state.status,
            exit_code: state.exit_code,
            started_at: state.started_at,
            ended_at: state.ended_at,
            error: state.error,
            output_truncated: self.output_truncated(),
        }
    }

    /// Whether two handles refer to the same command
    pub fn same_as(&self, other: &CommandHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("task", &self.inner.task)
            .field("seq", &self.inner.seq)
            .field("command", &self.inner.command)
            .field("status", &self.status())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

/// Serializable point-in-time view of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSnapshot {
    pub seq: u64,
    pub task: String,
    pub command: String,
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output_truncated: bool,
}
