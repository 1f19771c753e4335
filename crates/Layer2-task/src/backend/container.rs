//! Container backend - one long-lived container per task
//!
//! Containers are named `ncluster-<task name>` and kept alive with
//! `sleep infinity`. A running container with that name is reused, a
//! stopped one is restarted, otherwise a new one is created. Runtime CLI
//! calls made while provisioning are retried with backoff.

use super::retry::with_retry;
use super::{Backend, TaskConfig};
use crate::naming;
use crate::session::{ContainerRuntime, ContainerSession};
use crate::task::{Task, TaskSettings};
use async_trait::async_trait;
use ncluster_foundation::{
    BackendKind, ClusterConfig, ContainerSettings, Error, Result, RetrySettings,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Label set on every container this backend creates
pub const MANAGED_LABEL: &str = "ncluster.managed";

/// Root of task working directories inside containers
pub const CONTAINER_WORKDIR_ROOT: &str = "/tmp/ncluster";

/// How to create a task container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub network: Option<String>,
    pub cpus: Option<f32>,
    pub memory: Option<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            working_dir: None,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            network: None,
            cpus: None,
            memory: None,
        }
    }

    /// Apply backend-wide settings
    pub fn with_settings(mut self, settings: &ContainerSettings) -> Self {
        self.env.extend(settings.env.clone());
        self.labels.extend(settings.labels.clone());
        self.network = settings.network.clone();
        self.cpus = settings.cpus;
        self.memory = settings.memory.clone();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Build `run` arguments for a detached, long-lived container
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];

        args.push("--name".to_string());
        args.push(self.name.clone());

        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        if let Some(cpus) = self.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.to_string());
        }
        if let Some(mem) = &self.memory {
            args.push("-m".to_string());
            args.push(mem.clone());
        }

        args.push(self.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }
}

/// Observed state of a named container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    Running,
    Stopped,
    Missing,
}

pub struct ContainerBackend {
    runtime: ContainerRuntime,
    settings: ContainerSettings,
    retry: RetrySettings,
    shell: String,
    scratch_root: PathBuf,
    logdir_root: RwLock<PathBuf>,
    max_output_bytes: usize,
    zone: String,
    region: String,
}

impl ContainerBackend {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let runtime = match &config.container.runtime {
            Some(name) => name.parse()?,
            None => ContainerRuntime::default(),
        };

        Ok(Self {
            runtime,
            settings: config.container.clone(),
            retry: config.retry.clone(),
            shell: config.effective_shell(),
            scratch_root: config.effective_scratch_root(),
            logdir_root: RwLock::new(config.effective_logdir_root()),
            max_output_bytes: config.effective_max_output_bytes(),
            zone: config.effective_zone(),
            region: config.effective_region(),
        })
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Fail early when the runtime CLI is not installed
    pub async fn ensure_available(&self) -> Result<()> {
        if self.runtime.is_available().await {
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "{} is not available",
                self.runtime.command()
            )))
        }
    }

    async fn inspect(&self, container: &str) -> Result<ContainerState> {
        let output = self
            .runtime
            .output(&["inspect", "-f", "{{.State.Running}}", container])
            .await?;
        if !output.status.success() {
            return Ok(ContainerState::Missing);
        }
        match String::from_utf8_lossy(&output.stdout).trim() {
            "true" => Ok(ContainerState::Running),
            _ => Ok(ContainerState::Stopped),
        }
    }

    /// Reuse, restart or create the task's container
    async fn ensure_container(&self, spec: &ContainerSpec) -> Result<()> {
        match self.inspect(&spec.name).await? {
            ContainerState::Running => {
                info!("Reusing running container {}", spec.name);
                Ok(())
            }
            ContainerState::Stopped => {
                info!("Restarting stopped container {}", spec.name);
                self.runtime
                    .check(&["start", &spec.name])
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::Provision(e.to_string()))
            }
            ContainerState::Missing => {
                info!("Creating container {} from {}", spec.name, spec.image);
                let args = spec.build_args();
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                let id = self
                    .runtime
                    .check(&args)
                    .await
                    .map_err(|e| Error::Provision(e.to_string()))?;
                debug!("Container {} id {}", spec.name, id);
                Ok(())
            }
        }
    }

    /// Remove a task's container
    pub async fn terminate(&self, task: &str) -> Result<()> {
        let container = naming::container_name(task);
        info!("Removing container {}", container);
        self.runtime.check(&["rm", "-f", &container]).await.map(|_| ())
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn make_task(&self, config: TaskConfig) -> Result<Task> {
        let name = naming::or_auto(&config.name, "task");
        let container = naming::container_name(&name);
        let workdir = format!("{}/{}", CONTAINER_WORKDIR_ROOT, name);
        let image = config
            .image
            .clone()
            .unwrap_or_else(|| self.settings.effective_image());

        let spec = ContainerSpec::new(&container, image)
            .with_settings(&self.settings)
            .with_env("NCLUSTER_TASK", &name)
            .with_label(MANAGED_LABEL, "true")
            .with_label("ncluster.task", &name);

        with_retry(&self.retry, "ensure_container", || self.ensure_container(&spec)).await?;

        let session = with_retry(&self.retry, "attach_session", || {
            ContainerSession::open(&name, self.runtime, &container, &workdir, &self.shell)
        })
        .await?;

        let settings = TaskSettings {
            max_output_bytes: self.max_output_bytes,
            transfer_dir: self.scratch_root.join(".transfer"),
            artifact_dir: config.run.as_ref().map(|run| run.task_logdir(&name)),
        };
        let task = Task::new(name, Box::new(session), settings);

        task.initialize(&config.install_script).await?;
        info!("Task {} ready at {}", task.name(), task.address());
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
