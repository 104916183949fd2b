use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the project directory holding the store, pool, and config.
pub const TALLY_DIR: &str = ".tally";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// `sync_data` after every appended batch.
    #[serde(default = "default_true")]
    pub durable: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            durable: default_true(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Pending directory, relative to the project root unless absolute.
    #[serde(default = "default_pending_dir")]
    pub pending_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pending_dir: default_pending_dir(),
            extension: default_extension(),
        }
    }
}

impl IngestConfig {
    /// Absolute pending directory for a project rooted at `project_root`.
    #[must_use]
    pub fn resolve_pending_dir(&self, project_root: &Path) -> PathBuf {
        if self.pending_dir.is_absolute() {
            self.pending_dir.clone()
        } else {
            project_root.join(&self.pending_dir)
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_pending_dir() -> PathBuf {
    PathBuf::from(TALLY_DIR).join("pending")
}

fn default_extension() -> String {
    "csv".to_string()
}

/// Path of the project config file.
#[must_use]
pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(TALLY_DIR).join("config.toml")
}

/// Load `.tally/config.toml`, falling back to defaults when it is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Render the default config file written by `tally init`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&ProjectConfig::default()).context("Failed to render default config")
}
