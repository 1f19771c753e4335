//! Session trait

use crate::command::CommandHandle;
use async_trait::async_trait;
use ncluster_foundation::{BackendKind, Result};
use std::path::Path;

/// Execution channel owned by exactly one task
///
/// Implement to add a new kind of compute endpoint. A session accepts
/// command submissions without blocking and drives each submitted handle to
/// a terminal state; commands run in submission order.
#[async_trait]
pub trait Session: Send + Sync {
    /// Queue a command. On success the handle is `Running`.
    fn submit(&self, handle: &CommandHandle) -> Result<()>;

    /// Copy a local file or directory to `remote`
    async fn upload(&self, local: &Path, remote: &str, dont_overwrite: bool) -> Result<()>;

    /// Copy `remote` to a local path
    async fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Check whether a remote path exists
    async fn exists(&self, remote: &str) -> Result<bool>;

    /// Tear down the channel; outstanding commands fail
    async fn shutdown(&self) -> Result<()>;

    /// Whether the channel can still accept commands
    fn is_alive(&self) -> bool;

    fn kind(&self) -> BackendKind;

    /// Human-readable endpoint location
    fn address(&self) -> String;

    /// Directory relative remote paths resolve against
    fn workdir(&self) -> String;
}

/// Resolve `remote` against a POSIX working directory
pub fn resolve_remote(workdir: &str, remote: &str) -> String {
    if remote.starts_with('/') || workdir.is_empty() {
        return remote.to_string();
    }
    let remote = remote.strip_prefix("./").unwrap_or(remote);
    format!("{}/{}", workdir.trim_end_matches('/'), remote)
}
