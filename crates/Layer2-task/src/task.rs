//! Task - one addressable compute endpoint
//!
//! A task exclusively owns one session and an append-only history of the
//! commands issued on it. Clones share the same session and history.

use crate::artifacts;
use crate::command::CommandHandle;
use crate::session::Session;
use crate::state::WaitStatus;
use ncluster_foundation::{BackendKind, Error, Result, DEFAULT_MAX_OUTPUT_BYTES};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker file written once the install script has succeeded
pub const INIT_MARKER: &str = "is_initialized";

/// Remote name the install script is written to
pub const INSTALL_SCRIPT: &str = "install.sh";

// ============================================================================
// Options
// ============================================================================

/// Options for `Task::run_with`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Return right after submission
    pub non_blocking: bool,

    /// Log a failure instead of returning it
    pub ignore_errors: bool,

    /// Deadline for the blocking wait
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for `Task::join_with` and `Job::join_with`
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Log a failure instead of returning it
    pub ignore_errors: bool,

    /// Deadline; on expiry the command keeps running
    pub timeout: Option<Duration>,

    /// Command to join instead of the last issued one (tasks only)
    pub handle: Option<CommandHandle>,
}

impl JoinOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn handle(mut self, handle: CommandHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl From<&RunOptions> for JoinOptions {
    fn from(options: &RunOptions) -> Self {
        Self {
            ignore_errors: options.ignore_errors,
            timeout: options.timeout,
            handle: None,
        }
    }
}

/// Result of `Task::run_with`
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Non-blocking submission
    Handle(CommandHandle),

    /// Blocking run that reached a terminal state
    Completed { exit_code: i32, output: String },
}

impl RunOutcome {
    pub fn handle(&self) -> Option<&CommandHandle> {
        match self {
            RunOutcome::Handle(handle) => Some(handle),
            RunOutcome::Completed { .. } => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunOutcome::Handle(handle) => handle.exit_code(),
            RunOutcome::Completed { exit_code, .. } => Some(*exit_code),
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            RunOutcome::Handle(_) => None,
            RunOutcome::Completed { output, .. } => Some(output),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Per-task settings supplied by the backend
#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Output bytes retained per command
    pub max_output_bytes: usize,

    /// Local staging directory for `write`/`read`
    pub transfer_dir: PathBuf,

    /// Where finished commands leave their artifacts
    pub artifact_dir: Option<PathBuf>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            transfer_dir: std::env::temp_dir().join("ncluster").join("transfer"),
            artifact_dir: None,
        }
    }
}

struct TaskInner {
    name: String,
    session: Box<dyn Session>,
    history: Mutex<Vec<CommandHandle>>,
    settings: TaskSettings,
}

/// A compute endpoint that runs shell commands
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn new(name: impl Into<String>, session: Box<dyn Session>, settings: TaskSettings) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                session,
                history: Mutex::new(Vec::new()),
                settings,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.session.kind()
    }

    pub fn address(&self) -> String {
        self.inner.session.address()
    }

    /// Directory relative remote paths resolve against
    pub fn workdir(&self) -> String {
        self.inner.session.workdir()
    }

    pub fn artifact_dir(&self) -> Option<&Path> {
        self.inner.settings.artifact_dir.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.session.is_alive()
    }

    // ========================================================================
    // Running commands
    // ========================================================================

    /// Run `command` and wait; returns its output. Non-zero exit is an error.
    pub async fn run(&self, command: &str) -> Result<String> {
        match self.run_with(command, RunOptions::default()).await? {
            RunOutcome::Completed { output, .. } => Ok(output),
            RunOutcome::Handle(handle) => Ok(handle.output()),
        }
    }

    /// Submit `command` and return immediately
    pub fn run_non_blocking(&self, command: &str) -> Result<CommandHandle> {
        let handle = {
            let mut history = self.inner.history.lock();
            let seq = history.len() as u64 + 1;
            let handle = CommandHandle::new(
                &self.inner.name,
                seq,
                command,
                self.inner.settings.max_output_bytes,
            );

            if is_comment(command) {
                debug!("{}: recording comment `{}`", self.inner.name, command.trim());
                handle.complete(0);
            } else {
                info!("{}> {}", self.inner.name, command);
                if let Err(e) = handle.start(self.inner.session.as_ref()) {
                    history.push(handle);
                    return Err(e);
                }
            }

            history.push(handle.clone());
            handle
        };

        self.record_artifacts(&handle);
        Ok(handle)
    }

    /// General form of `run` / `run_non_blocking`
    pub async fn run_with(&self, command: &str, options: RunOptions) -> Result<RunOutcome> {
        let handle = self.run_non_blocking(command)?;
        if options.non_blocking {
            return Ok(RunOutcome::Handle(handle));
        }

        let exit_code = self.join_handle(&handle, JoinOptions::from(&options)).await?;
        Ok(RunOutcome::Completed {
            exit_code,
            output: handle.output(),
        })
    }

    /// Wait for the last issued command; returns its exit code
    pub async fn join(&self) -> Result<i32> {
        self.join_with(JoinOptions::default()).await
    }

    pub async fn join_with(&self, options: JoinOptions) -> Result<i32> {
        let handle = match options.handle.clone() {
            Some(handle) => handle,
            None => self.last_command().ok_or_else(|| {
                Error::State(format!(
                    "Asked to join task {} which hasn't had any commands executed on it",
                    self.inner.name
                ))
            })?,
        };
        self.join_handle(&handle, options).await
    }

    /// Wait for a specific command issued on this task
    pub async fn join_handle(&self, handle: &CommandHandle, options: JoinOptions) -> Result<i32> {
        if let WaitStatus::StillRunning = handle.wait(options.timeout).await {
            return Err(Error::timeout(
                &self.inner.name,
                handle.command(),
                options.timeout.unwrap_or_default(),
            ));
        }

        if let Some(err) = handle.execution_error() {
            if options.ignore_errors {
                warn!(
                    "{}: `{}` failed with status {} (ignored)\n{}",
                    self.inner.name,
                    err.command,
                    err.exit_code,
                    err.output.trim_end()
                );
                return Ok(err.exit_code);
            }
            return Err(err.into());
        }

        handle.result()
    }

    // ========================================================================
    // History
    // ========================================================================

    /// All commands in invocation order
    pub fn history(&self) -> Vec<CommandHandle> {
        self.inner.history.lock().clone()
    }

    pub fn last_command(&self) -> Option<CommandHandle> {
        self.inner.history.lock().last().cloned()
    }

    pub fn last_output(&self) -> Option<String> {
        self.last_command().map(|h| h.output())
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_command().and_then(|h| h.exit_code())
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Upload to the working directory under the same base name.
    /// Glob patterns upload every match.
    pub async fn upload(&self, local: impl AsRef<Path>) -> Result<()> {
        self.upload_to(local, "", false).await
    }

    /// Upload to `remote` (a directory when `local` is a glob pattern)
    pub async fn upload_to(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        dont_overwrite: bool,
    ) -> Result<()> {
        let local = local.as_ref();
        let pattern = local.to_string_lossy().to_string();

        let commented = local
            .file_name()
            .map(|n| n.to_string_lossy().contains('#'))
            .unwrap_or(false);
        if commented {
            debug!("{}: skipping commented-out upload {}", self.inner.name, pattern);
            return Ok(());
        }

        if !is_glob(&pattern) {
            let remote = if remote.is_empty() {
                base_name(local)
            } else {
                remote.to_string()
            };
            return self.upload_one(local, &remote, dont_overwrite).await;
        }

        let paths = glob::glob(&pattern)
            .map_err(|e| Error::InvalidInput(format!("Bad pattern {}: {}", pattern, e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Transfer(e.to_string()))?;

        if paths.is_empty() {
            warn!("{}: no files match {}", self.inner.name, pattern);
        }
        for path in paths {
            let name = base_name(&path);
            if name.contains('#') {
                debug!("{}: skipping commented-out upload {}", self.inner.name, path.display());
                continue;
            }
            let target = if remote.is_empty() {
                name
            } else {
                format!("{}/{}", remote.trim_end_matches('/'), name)
            };
            self.upload_one(&path, &target, dont_overwrite).await?;
        }
        Ok(())
    }

    async fn upload_one(&self, local: &Path, remote: &str, dont_overwrite: bool) -> Result<()> {
        info!("{}: upload {} -> {}", self.inner.name, local.display(), remote);
        self.inner.session.upload(local, remote, dont_overwrite).await
    }

    pub async fn download(&self, remote: &str, local: impl AsRef<Path>) -> Result<()> {
        let local = local.as_ref();
        info!("{}: download {} -> {}", self.inner.name, remote, local.display());
        self.inner.session.download(remote, local).await
    }

    pub async fn exists(&self, remote: &str) -> Result<bool> {
        self.inner.session.exists(remote).await
    }

    /// Write `contents` to a remote file
    pub async fn write(&self, remote: &str, contents: &str) -> Result<()> {
        let staging = self.staging_path().await?;
        tokio::fs::write(&staging, contents).await?;
        let result = self.inner.session.upload(&staging, remote, false).await;
        let _ = tokio::fs::remove_file(&staging).await;
        result
    }

    /// Read a remote file as text
    pub async fn read(&self, remote: &str) -> Result<String> {
        let staging = self.staging_path().await?;
        let result = match self.inner.session.download(remote, &staging).await {
            Ok(()) => tokio::fs::read(&staging)
                .await
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&staging).await;
        result
    }

    async fn staging_path(&self) -> Result<PathBuf> {
        let dir = &self.inner.settings.transfer_dir;
        tokio::fs::create_dir_all(dir).await?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        Ok(dir.join(format!("{}-{}", self.inner.name, &id[..8])))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run the install script once per working directory.
    ///
    /// Presence of `is_initialized` means a previous run already succeeded.
    pub async fn initialize(&self, install_script: &str) -> Result<()> {
        if install_script.trim().is_empty() {
            return Ok(());
        }

        if self.exists(INIT_MARKER).await? {
            info!("{}: reusing previous initialized state", self.inner.name);
            return Ok(());
        }

        info!("{}: running install script", self.inner.name);
        self.write(INSTALL_SCRIPT, install_script).await?;
        self.run(&format!("sh -e {}", INSTALL_SCRIPT)).await?;
        self.write(INIT_MARKER, "ok\n").await?;
        Ok(())
    }

    /// Close the session; outstanding commands fail with a channel error
    pub async fn shutdown(&self) -> Result<()> {
        debug!("{}: shutting down", self.inner.name);
        self.inner.session.shutdown().await
    }

    fn record_artifacts(&self, handle: &CommandHandle) {
        let Some(dir) = self.inner.settings.artifact_dir.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let handle = handle.clone();
        runtime.spawn(async move {
            handle.wait(None).await;
            if let Err(e) = artifacts::write_record(&dir, &handle).await {
                warn!(
                    "{}: failed to write artifacts for command {}: {}",
                    handle.task_name(),
                    handle.seq(),
                    e
                );
            }
        });
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("kind", &self.kind())
            .field("address", &self.address())
            .finish()
    }
}

/// Blank lines and `#` comments never reach the session
fn is_comment(command: &str) -> bool {
    let trimmed = command.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
