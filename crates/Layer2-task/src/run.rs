//! Run - named group of jobs sharing one log directory

use crate::artifacts;
use crate::backend::{JobConfig, RunContext};
use crate::cluster::Cluster;
use crate::job::Job;
use crate::naming;
use ncluster_foundation::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct Run {
    name: String,
    logdir: PathBuf,
    cluster: Cluster,
    jobs: Mutex<Vec<Job>>,
}

impl Run {
    /// Create the run and its log directory.
    ///
    /// The log directory is `<logdir_root>/<name>`, or `<name>.01`, `.02`, ...
    /// when earlier runs already used that name.
    pub async fn create(cluster: Cluster, name: &str) -> Result<Self> {
        let name = naming::or_auto(name, "run");
        if name.contains('.') {
            return Err(Error::InvalidInput(format!(
                "Run name {} must not contain dots",
                name
            )));
        }

        let logdir = artifacts::dedupe_logdir(&cluster.logdir_root(), &name);
        tokio::fs::create_dir_all(&logdir).await?;
        info!("Run {} logging to {}", name, logdir.display());

        Ok(Self {
            name,
            logdir,
            cluster,
            jobs: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    /// Jobs in creation order
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    /// Create a job named `"{job}.{run}"` whose tasks log under this run
    pub async fn make_job(&self, mut config: JobConfig) -> Result<Job> {
        let job = naming::or_auto(&config.name, "job");
        config.name = naming::job_name_in_run(&job, &self.name);
        config.run = Some(RunContext {
            name: self.name.clone(),
            logdir: self.logdir.clone(),
        });

        let job = self.cluster.make_job(config).await?;
        self.jobs.lock().push(job.clone());
        Ok(job)
    }

    /// Run on each job in creation order; stops at the first failing job
    pub async fn run(&self, command: &str) -> Result<()> {
        for job in self.jobs() {
            job.run(command).await?;
        }
        Ok(())
    }

    /// Shut down every job; returns the first error
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for job in self.jobs() {
            if let Err(e) = job.shutdown().await {
                warn!("Run {}: failed to shut down {}: {}", self.name, job.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("name", &self.name)
            .field("logdir", &self.logdir)
            .field("jobs", &self.jobs.lock().len())
            .finish()
    }
}
