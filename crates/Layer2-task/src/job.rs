//! Job - fixed-size group of tasks operated on as a unit
//!
//! Broadcast operations run on every task concurrently and report failures
//! in task order. One failing task never stops the others.

use crate::command::CommandHandle;
use crate::task::{JoinOptions, RunOptions, RunOutcome, Task};
use futures::future::join_all;
use ncluster_foundation::{AggregateError, Error, Result, TaskFailure};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

struct JobInner {
    name: String,
    run_name: Option<String>,
    tasks: Vec<Task>,
}

#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new(name: impl Into<String>, run_name: Option<String>, tasks: Vec<Task>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                name: name.into(),
                run_name,
                tasks,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn run_name(&self) -> Option<&str> {
        self.inner.run_name.as_deref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.inner.tasks
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.inner.tasks.get(index)
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    /// Run on every task and wait for all of them
    pub async fn run(&self, command: &str) -> Result<()> {
        self.run_with(command, RunOptions::default()).await.map(|_| ())
    }

    /// Submit to every task; returns one handle per task
    pub fn run_non_blocking(&self, command: &str) -> Result<Vec<CommandHandle>> {
        info!("{}: broadcasting `{}` to {} tasks", self.inner.name, command, self.len());
        let results = self
            .inner
            .tasks
            .iter()
            .map(|task| task.run_non_blocking(command))
            .collect();
        self.collect(results)
    }

    pub async fn run_with(&self, command: &str, options: RunOptions) -> Result<Vec<RunOutcome>> {
        if options.non_blocking {
            return self
                .run_non_blocking(command)
                .map(|handles| handles.into_iter().map(RunOutcome::Handle).collect());
        }

        info!("{}: running `{}` on {} tasks", self.inner.name, command, self.len());
        let results = join_all(
            self.inner
                .tasks
                .iter()
                .map(|task| task.run_with(command, options.clone())),
        )
        .await;
        self.collect(results)
    }

    /// Join the last command of every task; returns exit codes in task order
    pub async fn join(&self) -> Result<Vec<i32>> {
        self.join_with(JoinOptions::default()).await
    }

    pub async fn join_with(&self, options: JoinOptions) -> Result<Vec<i32>> {
        if options.handle.is_some() {
            return Err(Error::InvalidInput(format!(
                "Job {} joins each task's last command; join the task to wait on a specific handle",
                self.inner.name
            )));
        }

        let results = join_all(
            self.inner
                .tasks
                .iter()
                .map(|task| task.join_with(options.clone())),
        )
        .await;
        self.collect(results)
    }

    /// Upload to every task under the same base name
    pub async fn upload(&self, local: impl AsRef<Path>) -> Result<()> {
        self.upload_to(local, "", false).await
    }

    pub async fn upload_to(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        dont_overwrite: bool,
    ) -> Result<()> {
        let local = local.as_ref();
        let results = join_all(
            self.inner
                .tasks
                .iter()
                .map(|task| task.upload_to(local, remote, dont_overwrite)),
        )
        .await;
        self.collect(results).map(|_| ())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let results = join_all(self.inner.tasks.iter().map(|task| task.shutdown())).await;
        self.collect(results).map(|_| ())
    }

    /// Pair per-task results with task indices; any failure becomes an
    /// `AggregateError` listing every failed task in order
    fn collect<T>(&self, results: Vec<Result<T>>) -> Result<Vec<T>> {
        let total = results.len();
        let mut values = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, (task, result)) in self.inner.tasks.iter().zip(results).enumerate() {
            match result {
                Ok(value) => values.push(value),
                Err(error) => failures.push(TaskFailure {
                    index,
                    task: task.name().to_string(),
                    error: Box::new(error),
                }),
            }
        }

        if failures.is_empty() {
            Ok(values)
        } else {
            Err(AggregateError {
                job: self.inner.name.clone(),
                total,
                failures,
            }
            .into())
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.inner.name)
            .field("run", &self.inner.run_name)
            .field("tasks", &self.inner.tasks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LocalSession, LocalSessionConfig};
    use crate::task::TaskSettings;
    use tempfile::{tempdir, TempDir};

    async fn local_job(name: &str, size: usize) -> (Job, TempDir) {
        let dir = tempdir().unwrap();
        let mut tasks = Vec::new();
        for i in 0..size {
            let task_name = format!("{}.{}", i, name);
            let session =
                LocalSession::open(&task_name, LocalSessionConfig::new(dir.path().join(&task_name)))
                    .await
                    .unwrap();
            tasks.push(Task::new(task_name, Box::new(session), TaskSettings::default()));
        }
        (Job::new(name, None, tasks), dir)
    }

    #[tokio::test]
    async fn test_job_run_all_succeed() {
        let (job, _dir) = local_job("ok", 2).await;
        job.run("echo hi").await.unwrap();
        assert_eq!(job.join().await.unwrap(), vec![0, 0]);
        for task in job.tasks() {
            assert_eq!(task.last_output().as_deref(), Some("hi\n"));
        }
        job.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_job_join_rejects_explicit_handle() {
        let (job, _dir) = local_job("handle", 1).await;
        let handle = job.task(0).unwrap().run_non_blocking("true").unwrap();
        let result = job.join_with(JoinOptions::new().handle(handle)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        job.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_job_join_without_commands_aggregates() {
        let (job, _dir) = local_job("idle", 2).await;
        match job.join().await {
            Err(Error::Aggregate(agg)) => {
                assert_eq!(agg.failed_indices(), vec![0, 1]);
                assert!(matches!(*agg.failures[0].error, Error::State(_)));
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
        job.shutdown().await.unwrap();
    }
}
