//! Configuration for threadrig

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Name given to workers registered without one
    #[serde(default = "default_worker_name")]
    pub default_worker_name: String,

    /// Optional prefix for OS thread names (`prefix-name`)
    #[serde(default)]
    pub thread_name_prefix: Option<String>,

    /// Stack size in bytes for each worker thread
    #[serde(default)]
    pub stack_size: Option<usize>,

    /// Log faults that lose the first-fault race
    #[serde(default = "default_true")]
    pub log_discarded_faults: bool,

    /// Join worker threads once the completion barrier releases
    #[serde(default = "default_true")]
    pub reap_on_wait: bool,
}

fn default_worker_name() -> String {
    crate::DEFAULT_WORKER_NAME.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            default_worker_name: default_worker_name(),
            thread_name_prefix: None,
            stack_size: None,
            log_discarded_faults: true,
            reap_on_wait: true,
        }
    }
}

impl RigConfig {
    /// Load config from an explicit path, else the first default location
    /// that exists, else defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::read_from(config_path);
        }

        let candidates = [
            dirs::config_dir().map(|dir| dir.join("threadrig").join("config.yml")),
            Some(PathBuf::from("threadrig.yml")),
        ];
        match candidates.into_iter().flatten().find(|candidate| candidate.exists()) {
            Some(found) => Self::read_from(&found),
            None => Ok(Self::default()),
        }
    }

    fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read rig config {}", path.display()))?;
        serde_yaml::from_str(&content).wrap_err_with(|| format!("Invalid rig config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).wrap_err("Failed to serialize rig config")?;
        std::fs::write(path, content).wrap_err_with(|| format!("Failed to write rig config {}", path.display()))
    }

    /// OS thread name for a worker
    pub fn thread_name(&self, worker_name: &str) -> String {
        match &self.thread_name_prefix {
            Some(prefix) => format!("{}-{}", prefix, worker_name),
            None => worker_name.to_string(),
        }
    }
}
