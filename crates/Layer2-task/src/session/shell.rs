//! Persistent shell channel
//!
//! Runs one long-lived `sh` (or compatible) process and feeds it commands on
//! stdin. Each command is wrapped so that the shell prints a unique marker
//! line carrying the exit status once the command finishes:
//!
//! ```text
//! { command eval '<command>'; } </dev/null 2>&1; printf '%s %d\n' '<marker>' "$?"
//! ```
//!
//! Everything the shell prints before the marker belongs to the command.
//! Because it is one shell, `cd` and `export` persist between commands.
//! `command eval` keeps a syntax error from ending a non-interactive shell;
//! it fails the command with a non-zero status instead.
//!
//! Background jobs (`cmd &`) inherit the session's stdout. Whatever they print
//! after their command's marker is attributed to the command running at that
//! moment, so redirect their output (`cmd >log 2>&1 &`).

use crate::command::CommandHandle;
use ncluster_foundation::{Error, Result};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a closing shell gets to exit on its own before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// A command queued for the driver
///
/// Dropping a submission that never completed fails its handle, so a handle
/// cannot outlive its channel in a non-terminal state.
struct Submission {
    handle: CommandHandle,
}

impl Drop for Submission {
    fn drop(&mut self) {
        self.handle
            .fail_channel("session closed before the command completed");
    }
}

/// Handle to a running shell process and its driver task
pub struct ShellSession {
    label: String,
    pid: Option<u32>,
    tx: mpsc::UnboundedSender<Submission>,
    shutdown: Arc<Notify>,
    alive: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ShellSession {
    /// Spawn `command` as the session shell.
    ///
    /// The caller sets program, arguments, working directory and environment;
    /// stdio is taken over here.
    pub fn spawn(mut command: Command, label: impl Into<String>) -> Result<Self> {
        let label = label.into();

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Backend(format!("Failed to spawn shell for {}: {}", label, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Backend(format!("Shell for {} has no stdin", label)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Backend(format!("Shell for {} has no stdout", label)))?;

        if let Some(stderr) = child.stderr.take() {
            let stderr_label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(session = %stderr_label, "stderr: {}", line);
                }
            });
        }

        let pid = child.id();
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let alive = Arc::new(AtomicBool::new(true));

        let driver = Driver {
            label: label.clone(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            counter: 0,
            stdin,
            stdout: LineReader::new(stdout),
            rx,
            shutdown: shutdown.clone(),
            alive: alive.clone(),
        };
        let driver = tokio::spawn(driver.run(child));

        debug!(session = %label, pid = ?pid, "shell session started");

        Ok(Self {
            label,
            pid,
            tx,
            shutdown,
            alive,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Queue a command; marks the handle `Running`
    pub fn submit(&self, handle: &CommandHandle) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::State(format!("Session {} is closed", self.label)));
        }

        handle.mark_running();
        self.tx
            .send(Submission {
                handle: handle.clone(),
            })
            .map_err(|_| Error::State(format!("Session {} is closed", self.label)))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop the driver and wait for the shell to go away
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.notify_one();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.await.map_err(|e| {
                Error::Internal(format!("Session driver for {} failed: {}", self.label, e))
            })?;
        }
        Ok(())
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

// ============================================================================
// Driver
// ============================================================================

enum Step {
    Continue,
    Stop,
}

struct Driver {
    label: String,
    nonce: String,
    counter: u64,
    stdin: ChildStdin,
    stdout: LineReader,
    rx: mpsc::UnboundedReceiver<Submission>,
    shutdown: Arc<Notify>,
    alive: Arc<AtomicBool>,
}

impl Driver {
    async fn run(mut self, mut child: Child) {
        loop {
            let submission = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                next = self.rx.recv() => match next {
                    Some(submission) => submission,
                    None => break,
                },
            };

            if let Step::Stop = self.execute(&submission.handle).await {
                break;
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        self.rx.close();
        while let Ok(submission) = self.rx.try_recv() {
            submission.handle.fail_channel("session closed");
        }

        let Driver { label, stdin, .. } = self;
        drop(stdin);

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(session = %label, "shell exited: {}", status),
            Ok(Err(e)) => warn!(session = %label, "failed to reap shell: {}", e),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(session = %label, "failed to kill shell: {}", e);
                }
                debug!(session = %label, "shell killed");
            }
        }
    }

    async fn execute(&mut self, handle: &CommandHandle) -> Step {
        self.counter += 1;
        let marker = format!("__ncluster_{}_{}__", self.nonce, self.counter);
        let script = wrap_command(handle.command(), &marker);

        debug!(session = %self.label, seq = handle.seq(), "dispatching command");

        if let Err(e) = self.write(&script).await {
            handle.fail_channel(format!("write to session failed: {}", e));
            return Step::Stop;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    handle.fail_channel("session shut down");
                    return Step::Stop;
                }
                line = self.stdout.next_line() => match line {
                    Ok(Some(line)) => match split_marker(&line, &marker) {
                        Some((prefix, exit_code)) => {
                            if !prefix.is_empty() {
                                handle.push_output(prefix);
                            }
                            handle.complete(exit_code);
                            debug!(
                                session = %self.label,
                                seq = handle.seq(),
                                exit_code,
                                "command finished"
                            );
                            return Step::Continue;
                        }
                        None => handle.push_output(line),
                    },
                    Ok(None) => {
                        handle.fail_channel("session exited");
                        return Step::Stop;
                    }
                    Err(e) => {
                        handle.fail_channel(format!("read from session failed: {}", e));
                        return Step::Stop;
                    }
                }
            }
        }
    }

    async fn write(&mut self, script: &str) -> std::io::Result<()> {
        self.stdin.write_all(script.as_bytes()).await?;
        self.stdin.flush().await
    }
}

/// Newline-delimited reader that tolerates non-UTF-8 output
struct LineReader {
    inner: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl LineReader {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            inner: BufReader::new(stdout),
            buf: Vec::new(),
        }
    }

    /// Partially read bytes stay in `buf`, so a cancelled call can resume
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.inner.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.buf);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

// ============================================================================
// Protocol helpers
// ============================================================================

/// Single-quote `s` for POSIX sh
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a command so the shell reports its status after it finishes
fn wrap_command(command: &str, marker: &str) -> String {
    format!(
        "{{ command eval {}; }} </dev/null 2>&1; printf '%s %d\\n' '{}' \"$?\"\n",
        shell_quote(command),
        marker
    )
}

/// Split a line at the status marker into `(output prefix, exit code)`
fn split_marker<'a>(line: &'a str, marker: &str) -> Option<(&'a str, i32)> {
    let at = line.find(marker)?;
    let code = line[at + marker.len()..].trim().parse().ok()?;
    Some((&line[..at], code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CommandStatus, CHANNEL_FAILURE_EXIT_CODE};

    fn sh() -> Command {
        let mut cmd = Command::new("sh");
        cmd.current_dir(std::env::temp_dir());
        cmd
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("echo hi"), "'echo hi'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_split_marker() {
        let marker = "__ncluster_abc_1__";
        assert_eq!(split_marker("__ncluster_abc_1__ 0", marker), Some(("", 0)));
        assert_eq!(split_marker("partial__ncluster_abc_1__ 2", marker), Some(("partial", 2)));
        assert_eq!(split_marker("__ncluster_abc_2__ 0", marker), None);
        assert_eq!(split_marker("plain output", marker), None);
    }

    #[test]
    fn test_wrap_command() {
        let script = wrap_command("echo 'x'", "M");
        assert!(script.starts_with("{ command eval 'echo '\\''x'\\'''; }"));
        assert!(script.ends_with("printf '%s %d\\n' 'M' \"$?\"\n"));
    }

    #[tokio::test]
    async fn test_runs_commands_in_order() {
        let session = ShellSession::spawn(sh(), "test").unwrap();

        let first = CommandHandle::new("test", 1, "echo one", 1024);
        let second = CommandHandle::new("test", 2, "echo two; (exit 3)", 1024);
        session.submit(&first).unwrap();
        session.submit(&second).unwrap();

        second.wait(None).await;
        assert_eq!(first.status(), CommandStatus::Succeeded);
        assert_eq!(first.output(), "one\n");
        assert_eq!(second.exit_code(), Some(3));
        assert_eq!(second.output(), "two\n");

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_output_without_trailing_newline() {
        let session = ShellSession::spawn(sh(), "test").unwrap();
        let h = CommandHandle::new("test", 1, "printf abc", 1024);
        session.submit(&h).unwrap();
        h.wait(None).await;
        assert_eq!(h.output(), "abc\n");
        assert_eq!(h.exit_code(), Some(0));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shell_exit_is_channel_failure() {
        let session = ShellSession::spawn(sh(), "test").unwrap();
        let dying = CommandHandle::new("test", 1, "exit 4", 1024);
        let queued = CommandHandle::new("test", 2, "echo never", 1024);
        session.submit(&dying).unwrap();
        session.submit(&queued).unwrap();

        dying.wait(None).await;
        queued.wait(None).await;
        assert_eq!(dying.exit_code(), Some(CHANNEL_FAILURE_EXIT_CODE));
        assert_eq!(queued.status(), CommandStatus::Failed);
        assert!(queued.error_message().is_some());

        session.shutdown().await.unwrap();
        assert!(!session.is_alive());
        let late = CommandHandle::new("test", 3, "true", 1024);
        assert!(session.submit(&late).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_fails_running_command() {
        let session = ShellSession::spawn(sh(), "test").unwrap();
        let h = CommandHandle::new("test", 1, "sleep 30", 1024);
        session.submit(&h).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.shutdown().await.unwrap();
        assert_eq!(h.status(), CommandStatus::Failed);
        assert_eq!(h.error_message().as_deref(), Some("session shut down"));
    }
}
