//! Task lifecycle integration tests on the local backend
//!
//! `cargo test -p ncluster-task --test task_test`

use ncluster_task::{
    Cluster, ClusterConfig, CommandStatus, Error, JoinOptions, RunOptions, RunOutcome, Task,
    TaskConfig, WaitStatus, CHANNEL_FAILURE_EXIT_CODE,
};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn local_cluster(dir: &TempDir) -> Cluster {
    let config = ClusterConfig::new()
        .scratch_root(dir.path().join("tasks"))
        .logdir_root(dir.path().join("runs"));
    Cluster::from_config(&config).expect("local cluster")
}

async fn task(dir: &TempDir, name: &str) -> Task {
    local_cluster(dir)
        .make_task(TaskConfig::new(name))
        .await
        .expect("make_task failed")
}

#[tokio::test]
async fn test_failing_command_with_and_without_ignore_errors() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.illegal").await;
    let command = "mkdir /nonexistent_ncluster_parent/illegal";

    let outcome = task
        .run_with(command, RunOptions::new().ignore_errors())
        .await
        .expect("ignore_errors should not fail");
    match outcome {
        RunOutcome::Completed { exit_code, output } => {
            assert_ne!(exit_code, 0);
            assert!(!output.is_empty(), "mkdir should explain the failure");
        }
        RunOutcome::Handle(_) => panic!("blocking run returned a handle"),
    }

    match task.run(command).await {
        Err(Error::Execution(err)) => {
            assert_ne!(err.exit_code, 0);
            assert_eq!(err.command, command);
            assert_eq!(err.task, "0.illegal");
            assert!(err.channel_error.is_none());
        }
        other => panic!("expected execution error, got {:?}", other),
    }

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_syntax_error_keeps_session_usable() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.syntax").await;

    match task.run("echo 'unterminated").await {
        Err(Error::Execution(err)) => {
            assert_ne!(err.exit_code, 0);
            assert_ne!(err.exit_code, CHANNEL_FAILURE_EXIT_CODE);
            assert!(err.channel_error.is_none());
        }
        other => panic!("expected execution error, got {:?}", other),
    }

    assert!(task.is_alive());
    assert_eq!(task.run("echo ok").await.unwrap(), "ok\n");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ignored_failure_on_last_command_then_reuse() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.reuse").await;

    task.run_non_blocking("mkdir /nonexistent_ncluster_parent/illegal").unwrap();
    let code = task
        .join_with(JoinOptions::new().ignore_errors())
        .await
        .expect("ignore_errors should not fail");
    assert_ne!(code, 0);
    assert_eq!(task.last_command().unwrap().status(), CommandStatus::Failed);

    assert_eq!(task.run("echo again").await.unwrap(), "again\n");
    assert_eq!(task.last_command().unwrap().status(), CommandStatus::Succeeded);

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_in_invocation_order() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.history").await;

    let commands = ["echo one", "# two", "echo three"];
    for command in commands {
        task.run_non_blocking(command).unwrap();
    }
    task.join().await.unwrap();

    let history = task.history();
    let recorded: Vec<&str> = history.iter().map(|h| h.command()).collect();
    assert_eq!(recorded, commands);
    let seqs: Vec<u64> = history.iter().map(|h| h.seq()).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(task.last_output().as_deref(), Some("three\n"));

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_result_is_idempotent() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.result").await;

    let handle = task.run_non_blocking("(exit 3)").unwrap();
    handle.wait(None).await;
    assert_eq!(handle.result().unwrap(), 3);
    assert_eq!(handle.result().unwrap(), 3);
    assert_eq!(handle.status(), CommandStatus::Failed);

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_join_timeout_leaves_command_running() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.timeout").await;

    let handle = task.run_non_blocking("sleep 1; echo done").unwrap();
    let result = task
        .join_with(JoinOptions::new().timeout(Duration::from_millis(100)))
        .await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(handle.status(), CommandStatus::Running);
    assert!(handle.exit_code().is_none());

    assert_eq!(task.join().await.unwrap(), 0);
    assert_eq!(handle.output(), "done\n");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_join_explicit_handle() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.explicit").await;

    let failing = task.run_non_blocking("(exit 5)").unwrap();
    task.run_non_blocking("true").unwrap();

    assert_eq!(task.join().await.unwrap(), 0);
    let err = task
        .join_with(JoinOptions::new().handle(failing.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(5));

    let ignored = task
        .join_with(JoinOptions::new().handle(failing).ignore_errors())
        .await
        .unwrap();
    assert_eq!(ignored, 5);

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_comment_lines_never_reach_shell() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.comments").await;

    let handle = task.run_non_blocking("# exit 9").unwrap();
    assert_eq!(handle.status(), CommandStatus::Succeeded);
    assert_eq!(handle.wait(Some(Duration::ZERO)).await, WaitStatus::Finished(CommandStatus::Succeeded));

    // The shell is still usable, so `exit 9` was not executed
    assert_eq!(task.run("echo alive").await.unwrap(), "alive\n");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shell_state_persists() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.state").await;

    task.run("mkdir -p sub && cd sub").await.unwrap();
    let pwd = task.run("pwd").await.unwrap();
    assert!(pwd.trim_end().ends_with("/sub"), "pwd was {}", pwd);

    task.run("export GREETING=hello").await.unwrap();
    assert_eq!(task.run("echo $GREETING").await.unwrap(), "hello\n");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stderr_is_captured() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.stderr").await;

    let output = task.run("echo to-stderr >&2").await.unwrap();
    assert_eq!(output, "to-stderr\n");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exit_kills_session_as_channel_failure() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.exit").await;

    match task.run("exit 3").await {
        Err(Error::Execution(err)) => {
            assert_eq!(err.exit_code, CHANNEL_FAILURE_EXIT_CODE);
            assert!(err.channel_error.is_some());
        }
        other => panic!("expected channel failure, got {:?}", other),
    }

    // Driver may need a moment to mark the session dead
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_alive());
    assert!(task.run_non_blocking("echo late").is_err());
    assert_eq!(task.last_command().unwrap().status(), CommandStatus::Failed);
}

#[tokio::test]
async fn test_output_streaming() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.stream").await;

    let handle = task
        .run_non_blocking("sleep 0.2; echo first; echo second")
        .unwrap();
    let mut rx = handle.subscribe_output();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no output streamed")
        .unwrap();
    assert_eq!(first.content, "first");
    assert_eq!(task.join().await.unwrap(), 0);

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upload_glob_skips_comments() {
    let dir = tempdir().unwrap();
    let task = task(&dir, "0.upload").await;

    let staging = dir.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("a.txt"), "a").unwrap();
    std::fs::write(staging.join("b.txt"), "b").unwrap();
    std::fs::write(staging.join("skip#.txt"), "no").unwrap();

    task.upload(staging.join("*.txt")).await.unwrap();
    assert!(task.exists("a.txt").await.unwrap());
    assert!(task.exists("b.txt").await.unwrap());
    assert!(!task.exists("skip#.txt").await.unwrap());

    task.upload_to(staging.join("a.txt"), "inputs/renamed.txt", false)
        .await
        .unwrap();
    assert_eq!(task.read("inputs/renamed.txt").await.unwrap(), "a");

    let downloaded = dir.path().join("b-back.txt");
    task.download("b.txt", &downloaded).await.unwrap();
    assert_eq!(std::fs::read_to_string(downloaded).unwrap(), "b");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_truncated_output_keeps_tail() {
    let dir = tempdir().unwrap();
    let config = ClusterConfig::new()
        .scratch_root(dir.path().join("tasks"))
        .max_output_bytes(64);
    let cluster = Cluster::from_config(&config).unwrap();
    let task = cluster.make_task(TaskConfig::new("0.long")).await.unwrap();

    let handle = task
        .run_non_blocking("i=0; while [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done")
        .unwrap();
    assert_eq!(task.join().await.unwrap(), 0);

    assert!(handle.output_truncated());
    let output = handle.output();
    assert!(output.len() <= 64);
    assert!(output.ends_with("line99\n"));

    task.shutdown().await.unwrap();
}
