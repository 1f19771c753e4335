//! Local backend - one persistent shell per task on this machine
//!
//! Each task works in `<scratch_root>/<task name>`. The directory survives
//! across program invocations, so an install script that already succeeded
//! is not run again.

use super::{Backend, TaskConfig};
use crate::naming;
use crate::session::{LocalSession, LocalSessionConfig};
use crate::task::{Task, TaskSettings};
use async_trait::async_trait;
use ncluster_foundation::{BackendKind, ClusterConfig, Result};
use parking_lot::RwLock;
use std::path::PathBuf;
use tracing::info;

pub struct LocalBackend {
    shell: String,
    scratch_root: PathBuf,
    logdir_root: RwLock<PathBuf>,
    max_output_bytes: usize,
    zone: String,
    region: String,
}

impl LocalBackend {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            shell: config.effective_shell(),
            scratch_root: config.effective_scratch_root(),
            logdir_root: RwLock::new(config.effective_logdir_root()),
            max_output_bytes: config.effective_max_output_bytes(),
            zone: config.effective_zone(),
            region: config.effective_region(),
        }
    }

    pub fn scratch_root(&self) -> &PathBuf {
        &self.scratch_root
    }

    /// Working directory of a task
    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.scratch_root.join(task)
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(&ClusterConfig::new())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn make_task(&self, config: TaskConfig) -> Result<Task> {
        let name = naming::or_auto(&config.name, "task");
        let workdir = self.task_dir(&name);

        let session_config = LocalSessionConfig::new(&workdir)
            .with_shell(&self.shell)
            .with_env("NCLUSTER_TASK", &name);
        let session = LocalSession::open(&name, session_config).await?;

        let settings = TaskSettings {
            max_output_bytes: self.max_output_bytes,
            transfer_dir: self.scratch_root.join(".transfer"),
            artifact_dir: config.run.as_ref().map(|run| run.task_logdir(&name)),
        };
        let task = Task::new(name, Box::new(session), settings);

        task.initialize(&config.install_script).await?;
        info!("Task {} ready in {}", task.name(), workdir.display());
        Ok(task)
    }

    fn zone(&self) -> String {
        self.zone.clone()
    }

    fn region(&self) -> String {
        self.region.clone()
    }

    fn logdir_root(&self) -> PathBuf {
        self.logdir_root.read().clone()
    }

    fn set_logdir_root(&self, root: PathBuf) {
        *self.logdir_root.write() = root;
    }
}
