//! Job and Run integration tests on the local backend
//!
//! `cargo test -p ncluster-task --test job_test`

use ncluster_task::{
    Cluster, ClusterConfig, CommandStatus, Error, JobConfig, JoinOptions, RunOptions,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

fn local_cluster(dir: &TempDir) -> Cluster {
    let config = ClusterConfig::new()
        .scratch_root(dir.path().join("tasks"))
        .logdir_root(dir.path().join("runs"));
    Cluster::from_config(&config).expect("local cluster")
}

/// Artifacts are written by a background task once the command finishes
async fn wait_for_file(path: &Path) -> bool {
    for _ in 0..100 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_job_runs_tasks_concurrently() {
    let dir = tempdir().unwrap();
    let job = local_cluster(&dir)
        .make_job(JobConfig::new("sleepers", 2))
        .await
        .expect("make_job failed");

    let start = Instant::now();
    let handles = job.run_non_blocking("sleep 1").unwrap();
    assert!(start.elapsed() < Duration::from_millis(500), "submission blocked");
    assert_eq!(handles.len(), 2);

    assert_eq!(job.join().await.unwrap(), vec![0, 0]);
    assert!(start.elapsed() < Duration::from_millis(1900), "tasks ran sequentially");

    job.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blocking_job_run_waits_for_all_tasks() {
    let dir = tempdir().unwrap();
    let job = local_cluster(&dir)
        .make_job(JobConfig::new("blocking", 2))
        .await
        .unwrap();

    let start = Instant::now();
    job.run("sleep 1").await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1900), "tasks ran sequentially");

    for task in job.tasks() {
        assert_eq!(task.last_command().unwrap().status(), CommandStatus::Succeeded);
    }

    job.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_failure_reports_failed_index() {
    let dir = tempdir().unwrap();
    let job = local_cluster(&dir)
        .make_job(JobConfig::new("trio", 3))
        .await
        .unwrap();

    let result = job.run("test \"$NCLUSTER_TASK\" != 1.trio").await;
    match result {
        Err(Error::Aggregate(agg)) => {
            assert_eq!(agg.job, "trio");
            assert_eq!(agg.total, 3);
            assert_eq!(agg.failed_indices(), vec![1]);
            assert_eq!(agg.exit_codes(), vec![(1, 1)]);
            assert_eq!(agg.failures[0].task, "1.trio");
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }

    // The other tasks still ran to completion
    assert_eq!(job.task(0).unwrap().last_exit_code(), Some(0));
    assert_eq!(job.task(2).unwrap().last_exit_code(), Some(0));

    // ignore_errors degrades the failure to a warning
    let codes = job
        .join_with(JoinOptions::new().ignore_errors())
        .await
        .unwrap();
    assert_eq!(codes, vec![0, 1, 0]);

    let outcomes = job
        .run_with("(exit 2)", RunOptions::new().ignore_errors())
        .await
        .unwrap();
    assert!(outcomes.iter().all(|o| o.exit_code() == Some(2)));

    job.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_validation() {
    let dir = tempdir().unwrap();
    let cluster = local_cluster(&dir);

    assert!(matches!(
        cluster.make_job(JobConfig::new("empty", 0)).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        cluster.make_job(JobConfig::new("too.many.dots", 1)).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_job_upload_broadcasts() {
    let dir = tempdir().unwrap();
    let job = local_cluster(&dir)
        .make_job(JobConfig::new("shared", 2))
        .await
        .unwrap();

    let file = dir.path().join("config.txt");
    std::fs::write(&file, "shared").unwrap();
    job.upload(&file).await.unwrap();

    for task in job.tasks() {
        assert_eq!(task.read("config.txt").await.unwrap(), "shared");
    }
    job.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_logdir_dedup() {
    let dir = tempdir().unwrap();
    let cluster = local_cluster(&dir);

    let first = cluster.make_run("exp").await.unwrap();
    let second = cluster.make_run("exp").await.unwrap();

    assert_eq!(first.logdir(), dir.path().join("runs").join("exp"));
    assert_eq!(second.logdir(), dir.path().join("runs").join("exp.01"));
    assert!(second.logdir().is_dir());

    assert!(matches!(
        cluster.make_run("bad.name").await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_run_names_jobs_and_writes_artifacts() {
    let dir = tempdir().unwrap();
    let cluster = local_cluster(&dir);
    let run = cluster.make_run("exp").await.unwrap();

    let job = run.make_job(JobConfig::new("worker", 2)).await.unwrap();
    assert_eq!(job.name(), "worker.exp");
    assert_eq!(job.run_name(), Some("exp"));
    assert_eq!(job.task(1).unwrap().name(), "1.worker.exp");

    run.run("echo from-run").await.unwrap();

    let task_logdir = run.logdir().join("0.worker.exp");
    assert!(wait_for_file(&task_logdir.join("1.status")).await);
    assert!(wait_for_file(&task_logdir.join("1.json")).await);
    assert_eq!(
        std::fs::read_to_string(task_logdir.join("1.cmd")).unwrap(),
        "echo from-run"
    );
    assert_eq!(
        std::fs::read_to_string(task_logdir.join("1.out")).unwrap(),
        "from-run\n"
    );

    assert_eq!(run.jobs().len(), 1);
    run.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_stops_at_first_failing_job() {
    let dir = tempdir().unwrap();
    let cluster = local_cluster(&dir);
    let run = cluster.make_run("seq").await.unwrap();

    let first = run.make_job(JobConfig::new("first", 1)).await.unwrap();
    let second = run.make_job(JobConfig::new("second", 1)).await.unwrap();

    let result = run
        .run("case \"$NCLUSTER_TASK\" in *first*) exit_code=1 ;; *) exit_code=0 ;; esac; (exit $exit_code)")
        .await;
    assert!(matches!(result, Err(Error::Aggregate(_))));

    assert_eq!(first.task(0).unwrap().history().len(), 1);
    assert!(second.task(0).unwrap().history().is_empty());

    run.shutdown().await.unwrap();
}
