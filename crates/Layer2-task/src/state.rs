//! Command state machine

use serde::{Deserialize, Serialize};

/// Exit code reported when the execution channel fails before the command
/// reports its own status
pub const CHANNEL_FAILURE_EXIT_CODE: i32 = 255;

/// Lifecycle of one submitted command
///
/// `Pending -> Running -> {Succeeded, Failed}`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandStatus {
    /// Created, not yet accepted by the session
    Pending,

    /// Accepted by the session and executing
    Running,

    /// Exited with code 0
    Succeeded,

    /// Exited non-zero, or the channel failed
    Failed,
}

impl CommandStatus {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Succeeded | CommandStatus::Failed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, CommandStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Succeeded)
    }

    /// Classify an exit code
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            CommandStatus::Succeeded
        } else {
            CommandStatus::Failed
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "Pending",
            CommandStatus::Running => "Running",
            CommandStatus::Succeeded => "Succeeded",
            CommandStatus::Failed => "Failed",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "◯",
            CommandStatus::Running => "⟳",
            CommandStatus::Succeeded => "✓",
            CommandStatus::Failed => "✗",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Outcome of a bounded wait on a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The command reached a terminal state
    Finished(CommandStatus),

    /// The deadline elapsed first; the command keeps running
    StillRunning,
}

impl WaitStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, WaitStatus::Finished(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_classification() {
        assert_eq!(CommandStatus::from_exit_code(0), CommandStatus::Succeeded);
        assert_eq!(CommandStatus::from_exit_code(1), CommandStatus::Failed);
        assert_eq!(CommandStatus::from_exit_code(-1), CommandStatus::Failed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
        assert!(CommandStatus::Succeeded.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert_eq!(CommandStatus::Failed.to_string(), "Failed");
    }
}
