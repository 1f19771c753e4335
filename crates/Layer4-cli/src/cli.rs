//! Task and job commands

use anyhow::Context;
use clap::Args;
use ncluster_foundation::{ClusterConfig, Error};
use ncluster_task::{Cluster, JobConfig, Job, RunOptions, RunOutcome, Task, TaskConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Options shared by `task` and `job`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Shell command to run
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,

    /// Script to run once per task before the command
    #[arg(long)]
    pub install_script: Option<PathBuf>,

    /// Seconds to wait before giving up (the command keeps running)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Report failures without a non-zero exit
    #[arg(long)]
    pub ignore_errors: bool,

    /// Keep the session open after the command finishes
    #[arg(long)]
    pub keep: bool,
}

impl RunArgs {
    fn command_line(&self) -> String {
        self.command.join(" ")
    }

    fn options(&self) -> RunOptions {
        let mut options = RunOptions::new();
        if self.ignore_errors {
            options = options.ignore_errors();
        }
        if let Some(secs) = self.timeout {
            options = options.timeout(Duration::from_secs(secs));
        }
        options
    }

    fn install_script(&self) -> anyhow::Result<String> {
        match &self.install_script {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read install script {}", path.display())),
            None => Ok(String::new()),
        }
    }
}

pub async fn run_task(config: &ClusterConfig, name: &str, args: RunArgs) -> anyhow::Result<()> {
    let cluster = Cluster::from_config(config)?;
    let task = cluster
        .make_task(TaskConfig::new(name).install_script(args.install_script()?))
        .await?;
    info!("Task {} at {}", task.name(), task.address());

    let result = interruptible(task.run_with(&args.command_line(), args.options())).await;
    match &result {
        Ok(outcome) => report_outcome(&task, Some(outcome)),
        Err(Error::Execution(err)) => print!("{}", err.output),
        Err(_) => {}
    }

    if !args.keep {
        task.shutdown().await?;
    }
    result.map(|_| ()).map_err(Into::into)
}

pub async fn run_job(
    config: &ClusterConfig,
    name: &str,
    num_tasks: usize,
    args: RunArgs,
) -> anyhow::Result<()> {
    let cluster = Cluster::from_config(config)?;
    let job = cluster
        .make_job(JobConfig::new(name, num_tasks).install_script(args.install_script()?))
        .await?;
    info!("Job {} with {} tasks", job.name(), job.len());

    let result = interruptible(job.run_with(&args.command_line(), args.options())).await;
    match &result {
        Ok(outcomes) => {
            for (task, outcome) in job.tasks().iter().zip(outcomes) {
                report_outcome(task, Some(outcome));
            }
        }
        Err(Error::Aggregate(_)) => report_last_commands(&job),
        Err(_) => {}
    }

    if !args.keep {
        job.shutdown().await?;
    }
    result.map(|_| ()).map_err(Into::into)
}

/// Stop waiting on Ctrl-C
async fn interruptible<T>(
    work: impl std::future::Future<Output = ncluster_foundation::Result<T>>,
) -> ncluster_foundation::Result<T> {
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            Err(Error::Internal("interrupted".to_string()))
        }
    }
}

fn report_outcome(task: &Task, outcome: Option<&RunOutcome>) {
    let Some(RunOutcome::Completed { exit_code, output }) = outcome else {
        return;
    };
    println!("=== {} (status {}) ===", task.name(), exit_code);
    print!("{}", output);
}

fn report_last_commands(job: &Job) {
    for task in job.tasks() {
        let Some(last) = task.last_command() else {
            continue;
        };
        println!(
            "{} {} (status {})",
            last.status().symbol(),
            task.name(),
            last.exit_code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        print!("{}", last.output());
    }
}
