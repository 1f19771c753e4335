//! Container session - persistent shell inside a long-lived container
//!
//! Talks to Docker/Podman through their CLI: the shell runs under
//! `exec -i`, file transfer uses `cp`, existence checks use `exec test -e`.

use super::r#trait::{resolve_remote, Session};
use super::shell::ShellSession;
use crate::command::CommandHandle;
use async_trait::async_trait;
use ncluster_foundation::{BackendKind, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Output;
use std::str::FromStr;
use tokio::process::Command;
use tracing::debug;

/// Container runtime type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Run the runtime CLI and capture its output
    pub async fn output(&self, args: &[&str]) -> Result<Output> {
        debug!("{} {}", self.command(), args.join(" "));
        Command::new(self.command())
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Backend(format!("Failed to run {}: {}", self.command(), e)))
    }

    /// Run the runtime CLI; non-zero exit becomes `Error::Backend` with stderr
    pub async fn check(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(Error::Backend(format!(
                "{} {} failed: {}",
                self.command(),
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    pub async fn is_available(&self) -> bool {
        self.output(&["--version"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl FromStr for ContainerRuntime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(Error::Config(format!("Unknown container runtime: {}", other))),
        }
    }
}

/// A task session backed by `exec -i <container> sh`
pub struct ContainerSession {
    runtime: ContainerRuntime,
    container: String,
    workdir: String,
    shell: ShellSession,
}

impl ContainerSession {
    /// Attach a shell to a running container
    pub async fn open(
        label: &str,
        runtime: ContainerRuntime,
        container: impl Into<String>,
        workdir: impl Into<String>,
        shell: &str,
    ) -> Result<Self> {
        let container = container.into();
        let workdir = workdir.into();

        runtime
            .check(&["exec", &container, "mkdir", "-p", &workdir])
            .await?;

        let mut cmd = Command::new(runtime.command());
        cmd.args(["exec", "-i", "-w", &workdir, &container, shell]);
        let shell = ShellSession::spawn(cmd, label)?;

        debug!("Container session {} attached to {}", label, container);

        Ok(Self {
            runtime,
            container,
            workdir,
            shell,
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn resolve(&self, remote: &str) -> String {
        resolve_remote(&self.workdir, remote)
    }

    fn parent_of(path: &str) -> Option<&str> {
        path.rsplit_once('/')
            .map(|(parent, _)| parent)
            .filter(|parent| !parent.is_empty())
    }
}

#[async_trait]
impl Session for ContainerSession {
    fn submit(&self, handle: &CommandHandle) -> Result<()> {
        self.shell.submit(handle)
    }

    async fn upload(&self, local: &Path, remote: &str, dont_overwrite: bool) -> Result<()> {
        let target = self.resolve(remote);
        if dont_overwrite && self.exists(&target).await? {
            debug!("{}:{} exists, not overwriting", self.container, target);
            return Ok(());
        }
        if let Some(parent) = Self::parent_of(&target) {
            self.runtime
                .check(&["exec", &self.container, "mkdir", "-p", parent])
                .await?;
        }

        let source = local.to_string_lossy();
        let destination = format!("{}:{}", self.container, target);
        self.runtime
            .check(&["cp", &source, &destination])
            .await
            .map(|_| ())
            .map_err(|e| Error::Transfer(e.to_string()))
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let source = self.resolve(remote);
        if !self.exists(&source).await? {
            return Err(Error::NotFound(format!("{}:{}", self.container, source)));
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let source = format!("{}:{}", self.container, source);
        let destination = local.to_string_lossy();
        self.runtime
            .check(&["cp", &source, &destination])
            .await
            .map(|_| ())
            .map_err(|e| Error::Transfer(e.to_string()))
    }

    async fn exists(&self, remote: &str) -> Result<bool> {
        let path = self.resolve(remote);
        let output = self
            .runtime
            .output(&["exec", &self.container, "test", "-e", &path])
            .await?;
        Ok(output.status.success())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shell.shutdown().await
    }

    fn is_alive(&self) -> bool {
        self.shell.is_alive()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn address(&self) -> String {
        format!("{}://{}", self.runtime.command(), self.container)
    }

    fn workdir(&self) -> String {
        self.workdir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_parse() {
        assert_eq!("podman".parse::<ContainerRuntime>().unwrap(), ContainerRuntime::Podman);
        assert_eq!(" Docker ".parse::<ContainerRuntime>().unwrap(), ContainerRuntime::Docker);
        assert!("lxc".parse::<ContainerRuntime>().is_err());
        assert_eq!(ContainerRuntime::default().command(), "docker");
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(ContainerSession::parent_of("/tmp/x/a.txt"), Some("/tmp/x"));
        assert_eq!(ContainerSession::parent_of("/a.txt"), None);
        assert_eq!(ContainerSession::parent_of("a.txt"), None);
    }
}
