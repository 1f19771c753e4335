//! Backends - providers that manufacture tasks and jobs
//!
//! - `LocalBackend` - a persistent shell per task on this machine
//! - `ContainerBackend` - a long-lived Docker/Podman container per task
//!
//! Swapping backends changes where commands run, never how tasks, jobs and
//! command handles behave.

pub mod container;
pub mod local;
pub mod retry;

pub use container::{ContainerBackend, ContainerSpec};
pub use local::LocalBackend;
pub use retry::with_retry;

use crate::job::Job;
use crate::naming;
use crate::task::Task;
use async_trait::async_trait;
use futures::future::join_all;
use ncluster_foundation::{BackendKind, Error, Result};
use std::path::PathBuf;
use tracing::{info, warn};

/// Run membership passed down to tasks created through a `Run`
#[derive(Debug, Clone)]
pub struct RunContext {
    pub name: String,
    pub logdir: PathBuf,
}

impl RunContext {
    /// Artifact directory of a task in this run
    pub fn task_logdir(&self, task: &str) -> PathBuf {
        self.logdir.join(task)
    }
}

/// What to provision for one task
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    /// Task name; blank means auto-assigned
    pub name: String,

    /// Script run once per working directory
    pub install_script: String,

    /// Image override (container backend)
    pub image: Option<String>,

    pub run: Option<RunContext>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn install_script(mut self, script: impl Into<String>) -> Self {
        self.install_script = script.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// What to provision for a job
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Job name; blank means auto-assigned
    pub name: String,

    pub num_tasks: usize,

    pub install_script: String,

    pub image: Option<String>,

    pub run: Option<RunContext>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            num_tasks: 1,
            install_script: String::new(),
            image: None,
            run: None,
        }
    }
}

impl JobConfig {
    pub fn new(name: impl Into<String>, num_tasks: usize) -> Self {
        Self {
            name: name.into(),
            num_tasks,
            ..Default::default()
        }
    }

    pub fn install_script(mut self, script: impl Into<String>) -> Self {
        self.install_script = script.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Config for the task at `index`
    fn task_config(&self, index: usize, job: &str) -> TaskConfig {
        TaskConfig {
            name: naming::task_name(index, job),
            install_script: self.install_script.clone(),
            image: self.image.clone(),
            run: self.run.clone(),
        }
    }
}

/// Backend trait - implement to add new compute providers
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Provision one task with an established session
    async fn make_task(&self, config: TaskConfig) -> Result<Task>;

    /// Provision `num_tasks` tasks; see [`provision_job`]
    async fn make_job(&self, config: JobConfig) -> Result<Job> {
        provision_job(self, config).await
    }

    fn zone(&self) -> String;

    fn region(&self) -> String;

    /// Root under which run log directories are created
    fn logdir_root(&self) -> PathBuf;

    fn set_logdir_root(&self, root: PathBuf);
}

/// Provision every task of a job concurrently.
///
/// Tasks are named `"{i}.{job}"`. If any task fails, the tasks that were
/// created are shut down and the first error in index order is returned.
pub async fn provision_job<B: Backend + ?Sized>(backend: &B, config: JobConfig) -> Result<Job> {
    if config.num_tasks == 0 {
        return Err(Error::InvalidInput("Job must have at least one task".to_string()));
    }

    let name = naming::or_auto(&config.name, "job");
    naming::validate_job_name(&name)?;

    info!("Creating job {} with {} tasks", name, config.num_tasks);

    let results = join_all(
        (0..config.num_tasks).map(|index| backend.make_task(config.task_config(index, &name))),
    )
    .await;

    let mut tasks = Vec::with_capacity(config.num_tasks);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(task) => tasks.push(task),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(error) = first_error {
        for task in &tasks {
            if let Err(e) = task.shutdown().await {
                warn!("Failed to shut down {} after job failure: {}", task.name(), e);
            }
        }
        return Err(error);
    }

    info!("Job {} ready", name);
    Ok(Job::new(name, config.run.map(|run| run.name), tasks))
}
