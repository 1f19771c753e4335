//! Config - cluster settings
//!
//! - `cluster.rs` - ClusterConfig (backend selection, roots, limits)

mod cluster;

pub use cluster::{
    BackendKind, ClusterConfig, ContainerSettings, RetrySettings, CLUSTER_CONFIG_FILE,
    DEFAULT_MAX_OUTPUT_BYTES, ENV_BACKEND, ENV_IMAGE, ENV_LOGDIR_ROOT, ENV_SCRATCH_ROOT,
};
