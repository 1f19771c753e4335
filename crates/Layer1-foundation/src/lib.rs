//! # ncluster-foundation
//!
//! Foundation layer for ncluster:
//! - Error: crate-wide error taxonomy (state, execution, timeout, aggregate)
//! - Config: `ClusterConfig` (backend selection, log/scratch roots, limits)
//! - Storage: `JsonStore` for global and project config files

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{AggregateError, Error, ExecutionError, Result, TaskFailure};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    BackendKind, ClusterConfig, ContainerSettings, RetrySettings, CLUSTER_CONFIG_FILE,
    DEFAULT_MAX_OUTPUT_BYTES, ENV_BACKEND, ENV_IMAGE, ENV_LOGDIR_ROOT, ENV_SCRATCH_ROOT,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;
