//! Cluster - explicit handle to the selected backend
//!
//! Built once at startup and passed to whatever needs to create tasks.
//! Clones share the same backend.

use crate::backend::{Backend, ContainerBackend, JobConfig, LocalBackend, TaskConfig};
use crate::job::Job;
use crate::run::Run;
use crate::task::Task;
use ncluster_foundation::{BackendKind, ClusterConfig, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Cluster {
    backend: Arc<dyn Backend>,
}

impl Cluster {
    /// Pick the backend named by `config`
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        let backend: Arc<dyn Backend> = match config.backend_kind()? {
            BackendKind::Local => Arc::new(LocalBackend::new(config)),
            BackendKind::Container => Arc::new(ContainerBackend::new(config)?),
        };

        info!("Using {} backend", backend.kind());
        Ok(Self { backend })
    }

    /// Load configuration from files and environment, then pick the backend
    pub fn load() -> Result<Self> {
        Self::from_config(&ClusterConfig::load()?)
    }

    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_local(&self) -> bool {
        self.kind() == BackendKind::Local
    }

    pub async fn make_task(&self, config: TaskConfig) -> Result<Task> {
        self.backend.make_task(config).await
    }

    pub async fn make_job(&self, config: JobConfig) -> Result<Job> {
        self.backend.make_job(config).await
    }

    pub async fn make_run(&self, name: &str) -> Result<Run> {
        Run::create(self.clone(), name).await
    }

    pub fn zone(&self) -> String {
        self.backend.zone()
    }

    pub fn region(&self) -> String {
        self.backend.region()
    }

    pub fn logdir_root(&self) -> PathBuf {
        self.backend.logdir_root()
    }

    pub fn set_logdir_root(&self, root: impl Into<PathBuf>) {
        self.backend.set_logdir_root(root.into());
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("backend", &self.kind())
            .field("region", &self.region())
            .field("zone", &self.zone())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_config_selects_backend() {
        let local = Cluster::from_config(&ClusterConfig::new()).unwrap();
        assert!(local.is_local());

        let container =
            Cluster::from_config(&ClusterConfig::new().backend(BackendKind::Container)).unwrap();
        assert_eq!(container.kind(), BackendKind::Container);

        let mut bad = ClusterConfig::new();
        bad.backend = Some("aws".to_string());
        assert!(Cluster::from_config(&bad).is_err());
    }

    #[test]
    fn test_clones_share_backend() {
        let dir = tempdir().unwrap();
        let cluster = Cluster::from_config(&ClusterConfig::new()).unwrap();
        let other = cluster.clone();
        cluster.set_logdir_root(dir.path());
        assert_eq!(other.logdir_root(), dir.path());
    }
}
