//! Cluster Config - backend selection and execution settings
//!
//! Loaded once at startup: global file, then project file, then environment
//! overrides. The resulting value is immutable configuration that gets
//! threaded into the backend factory.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Config file name
pub const CLUSTER_CONFIG_FILE: &str = "config.json";

/// Environment variable selecting the backend
pub const ENV_BACKEND: &str = "NCLUSTER_BACKEND";
/// Environment variable overriding the log directory root
pub const ENV_LOGDIR_ROOT: &str = "NCLUSTER_LOGDIR_ROOT";
/// Environment variable overriding the task scratch root
pub const ENV_SCRATCH_ROOT: &str = "NCLUSTER_SCRATCH_ROOT";
/// Environment variable overriding the container image
pub const ENV_IMAGE: &str = "NCLUSTER_IMAGE";

/// Default cap on retained output per command (1 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

// ============================================================================
// Backend kind
// ============================================================================

/// Which provider manufactures tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Shell processes on this machine
    Local,
    /// Long-lived containers (Docker/Podman)
    Container,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Container => "container",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "container" | "docker" | "podman" => Ok(BackendKind::Container),
            other => Err(Error::Config(format!("Unknown backend: {}", other))),
        }
    }
}

// ============================================================================
// Cluster Config
// ============================================================================

/// ncluster settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Version (for migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Backend name (`local`, `container`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Root under which run log directories are created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logdir_root: Option<PathBuf>,

    /// Root under which local tasks get their working directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,

    /// Shell program used for task sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Output bytes retained per command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_bytes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Container backend settings
    #[serde(default)]
    pub container: ContainerSettings,

    /// Provisioning retry settings
    #[serde(default)]
    pub retry: RetrySettings,
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Global + project merge, then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<ClusterConfig>(CLUSTER_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<ClusterConfig>(CLUSTER_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        config.apply_env_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific store only (no environment overrides)
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        let mut config = Self::new();
        if let Some(loaded) = store.load_optional::<ClusterConfig>(CLUSTER_CONFIG_FILE)? {
            config.merge(loaded);
        }
        Ok(config)
    }

    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(CLUSTER_CONFIG_FILE, self)
    }

    pub fn save_project(&self) -> Result<()> {
        let store = JsonStore::current_project()?;
        store.save(CLUSTER_CONFIG_FILE, self)
    }

    /// Overlay `other` on top of `self`; set fields win
    pub fn merge(&mut self, other: ClusterConfig) {
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.logdir_root.is_some() {
            self.logdir_root = other.logdir_root;
        }
        if other.scratch_root.is_some() {
            self.scratch_root = other.scratch_root;
        }
        if other.shell.is_some() {
            self.shell = other.shell;
        }
        if other.max_output_bytes.is_some() {
            self.max_output_bytes = other.max_output_bytes;
        }
        if other.region.is_some() {
            self.region = other.region;
        }
        if other.zone.is_some() {
            self.zone = other.zone;
        }

        self.container.merge(other.container);
        self.retry.merge(other.retry);
    }

    /// Apply `NCLUSTER_*` overrides using the given variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(backend) = non_empty(ENV_BACKEND) {
            self.backend = Some(backend);
        }
        if let Some(root) = non_empty(ENV_LOGDIR_ROOT) {
            self.logdir_root = Some(PathBuf::from(root));
        }
        if let Some(root) = non_empty(ENV_SCRATCH_ROOT) {
            self.scratch_root = Some(PathBuf::from(root));
        }
        if let Some(image) = non_empty(ENV_IMAGE) {
            self.container.image = Some(image);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.backend_kind()?;
        if self.max_output_bytes == Some(0) {
            return Err(Error::Config(
                "maxOutputBytes must be greater than zero".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "retry.backoffMultiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Effective values
    // ========================================================================

    pub fn backend_kind(&self) -> Result<BackendKind> {
        match &self.backend {
            Some(name) => name.parse(),
            None => Ok(BackendKind::Local),
        }
    }

    pub fn effective_logdir_root(&self) -> PathBuf {
        self.logdir_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ncluster").join("runs"))
    }

    pub fn effective_scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ncluster").join("tasks"))
    }

    pub fn effective_shell(&self) -> String {
        self.shell.clone().unwrap_or_else(|| "sh".to_string())
    }

    pub fn effective_max_output_bytes(&self) -> usize {
        self.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES)
    }

    pub fn effective_region(&self) -> String {
        self.region.clone().unwrap_or_else(|| "local".to_string())
    }

    pub fn effective_zone(&self) -> String {
        self.zone.clone().unwrap_or_else(|| "local".to_string())
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend.as_str().to_string());
        self
    }

    pub fn logdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.logdir_root = Some(root.into());
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }
}

// ============================================================================
// Container Settings
// ============================================================================

/// Settings for the container backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSettings {
    /// `docker` or `podman`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    /// Default image for new task containers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Network name (`none`, `host`, or a custom network)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f32>,

    /// Memory limit (e.g. "2g")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ContainerSettings {
    fn merge(&mut self, other: ContainerSettings) {
        if other.runtime.is_some() {
            self.runtime = other.runtime;
        }
        if other.image.is_some() {
            self.image = other.image;
        }
        if other.network.is_some() {
            self.network = other.network;
        }
        if other.cpus.is_some() {
            self.cpus = other.cpus;
        }
        if other.memory.is_some() {
            self.memory = other.memory;
        }
        self.env.extend(other.env);
        self.labels.extend(other.labels);
    }

    pub fn effective_image(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| "ubuntu:22.04".to_string())
    }
}

// ============================================================================
// Retry Settings
// ============================================================================

/// Backoff settings for provisioning calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetrySettings {
    fn merge(&mut self, other: RetrySettings) {
        if other != RetrySettings::default() {
            *self = other;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_version() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cluster_config_default() {
        let config = ClusterConfig::new();
        assert_eq!(config.version, 1);
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Local);
        assert_eq!(config.effective_shell(), "sh");
        assert_eq!(config.effective_max_output_bytes(), DEFAULT_MAX_OUTPUT_BYTES);
        assert_eq!(config.effective_region(), "local");
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("Docker".parse::<BackendKind>().unwrap(), BackendKind::Container);
        assert!("aws".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut base = ClusterConfig::new().shell("bash");
        base.container.image = Some("alpine:3".to_string());

        let mut overlay = ClusterConfig::new().backend(BackendKind::Container);
        overlay.container.memory = Some("1g".to_string());

        base.merge(overlay);

        assert_eq!(base.backend_kind().unwrap(), BackendKind::Container);
        assert_eq!(base.effective_shell(), "bash");
        assert_eq!(base.container.effective_image(), "alpine:3");
        assert_eq!(base.container.memory.as_deref(), Some("1g"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ClusterConfig::new();
        config.apply_env_from(|key| match key {
            ENV_BACKEND => Some("container".to_string()),
            ENV_LOGDIR_ROOT => Some("/tmp/elsewhere".to_string()),
            ENV_IMAGE => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(config.backend_kind().unwrap(), BackendKind::Container);
        assert_eq!(config.effective_logdir_root(), PathBuf::from("/tmp/elsewhere"));
        assert!(config.container.image.is_none());
    }

    #[test]
    fn test_validate() {
        let mut config = ClusterConfig::new();
        config.backend = Some("gcp".to_string());
        assert!(config.validate().is_err());

        let config = ClusterConfig::new().max_output_bytes(0);
        assert!(config.validate().is_err());

        assert!(ClusterConfig::new().validate().is_ok());
    }

    #[test]
    fn test_load_from_store() {
        let dir = tempdir().unwrap();
        let store = JsonStore::project(dir.path());
        let saved = ClusterConfig::new()
            .backend(BackendKind::Container)
            .max_output_bytes(4096);
        store.save(CLUSTER_CONFIG_FILE, &saved).unwrap();

        let loaded = ClusterConfig::load_from(&store).unwrap();
        assert_eq!(loaded.backend_kind().unwrap(), BackendKind::Container);
        assert_eq!(loaded.effective_max_output_bytes(), 4096);
        assert_eq!(loaded.retry, RetrySettings::default());
    }
}
