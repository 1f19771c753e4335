//! # ncluster-task
//!
//! Task execution and lifecycle core for ncluster.
//! Turns a compute resource into a long-lived shell session that runs
//! commands non-blockingly and reports success or failure deterministically.
//!
//! ## Features
//!
//! - `CommandHandle` lifecycle tracking (`Pending -> Running -> Succeeded/Failed`)
//! - Tasks with append-only command history and join semantics
//! - Jobs that broadcast commands and aggregate per-task failures
//! - Runs that group jobs under a shared log directory
//! - Local and container backends behind one `Backend` trait
//! - Real-time output streaming with a bounded tail buffer

pub mod artifacts;
pub mod backend;
pub mod cluster;
pub mod command;
pub mod job;
pub mod log;
pub mod naming;
pub mod run;
pub mod session;
pub mod state;
pub mod task;

// Command lifecycle
pub use command::{CommandHandle, CommandSnapshot};
pub use state::{CommandStatus, WaitStatus, CHANNEL_FAILURE_EXIT_CODE};

// Output capture
pub use log::{OutputBuffer, OutputKind, OutputLine};

// Task / Job / Run
pub use job::Job;
pub use run::Run;
pub use task::{JoinOptions, RunOptions, RunOutcome, Task, TaskSettings, INIT_MARKER};

// Backends
pub use backend::{
    provision_job, Backend, ContainerBackend, ContainerSpec, JobConfig, LocalBackend, RunContext,
    TaskConfig,
};
pub use cluster::Cluster;

// Sessions
pub use session::{
    ContainerRuntime, ContainerSession, LocalSession, LocalSessionConfig, Session, ShellSession,
};

// Errors and configuration
pub use ncluster_foundation::{
    AggregateError, BackendKind, ClusterConfig, Error, ExecutionError, Result, TaskFailure,
};
