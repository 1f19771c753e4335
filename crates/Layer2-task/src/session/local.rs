//! Local session - persistent shell process on this machine

use super::r#trait::Session;
use super::shell::ShellSession;
use crate::command::CommandHandle;
use async_trait::async_trait;
use ncluster_foundation::{BackendKind, Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Local session configuration
#[derive(Debug, Clone)]
pub struct LocalSessionConfig {
    /// Shell program
    pub shell: String,

    /// Working directory (created if missing)
    pub workdir: PathBuf,

    /// Extra environment for the shell
    pub env: Vec<(String, String)>,
}

impl LocalSessionConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            shell: "sh".to_string(),
            workdir: workdir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A task session backed by a local shell
pub struct LocalSession {
    shell: ShellSession,
    workdir: PathBuf,
}

impl LocalSession {
    pub async fn open(label: &str, config: LocalSessionConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.workdir).await.map_err(|e| {
            Error::Backend(format!(
                "Failed to create working directory {}: {}",
                config.workdir.display(),
                e
            ))
        })?;

        let mut cmd = Command::new(&config.shell);
        cmd.current_dir(&config.workdir);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let shell = ShellSession::spawn(cmd, label)?;
        debug!("Local session {} in {}", label, config.workdir.display());

        Ok(Self {
            shell,
            workdir: config.workdir,
        })
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        self.workdir.join(remote)
    }
}

#[async_trait]
impl Session for LocalSession {
    fn submit(&self, handle: &CommandHandle) -> Result<()> {
        self.shell.submit(handle)
    }

    async fn upload(&self, local: &Path, remote: &str, dont_overwrite: bool) -> Result<()> {
        let target = self.resolve(remote);
        if dont_overwrite && tokio::fs::try_exists(&target).await? {
            debug!("{} exists, not overwriting", target.display());
            return Ok(());
        }
        copy_path(local, &target).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let source = self.resolve(remote);
        if !tokio::fs::try_exists(&source).await? {
            return Err(Error::NotFound(source.display().to_string()));
        }
        copy_path(&source, local).await
    }

    async fn exists(&self, remote: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(remote)).await?)
    }

    async fn shutdown(&self) -> Result<()> {
        self.shell.shutdown().await
    }

    fn is_alive(&self) -> bool {
        self.shell.is_alive()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn address(&self) -> String {
        match self.shell.pid() {
            Some(pid) => format!("localhost (pid {})", pid),
            None => "localhost".to_string(),
        }
    }

    fn workdir(&self) -> String {
        self.workdir.to_string_lossy().to_string()
    }
}

/// Copy a file or directory tree, creating parent directories
async fn copy_path(from: &Path, to: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(from)
        .await
        .map_err(|e| Error::Transfer(format!("{}: {}", from.display(), e)))?;

    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if !metadata.is_dir() {
        tokio::fs::copy(from, to).await.map_err(|e| {
            Error::Transfer(format!("{} -> {}: {}", from.display(), to.display(), e))
        })?;
        return Ok(());
    }

    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((path, target));
            } else {
                tokio::fs::copy(&path, &target).await.map_err(|e| {
                    Error::Transfer(format!("{} -> {}: {}", path.display(), target.display(), e))
                })?;
            }
        }
    }
    Ok(())
}
