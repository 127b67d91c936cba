use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub staleness: StalenessConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Detection model whose descriptors are clustered. Clusters never span
    /// models; switching models starts a fresh set of persons.
    #[serde(default = "default_model")]
    pub model: i64,

    /// Distance threshold below which two faces get a graph edge.
    /// Smaller values group more strictly.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,

    /// Faces below this confidence are treated as non-groupable.
    #[serde(default = "default_minimum_confidence")]
    pub minimum_confidence: f32,

    /// Maximum faces clustered in one graph. 0 means unbounded; values
    /// between 1 and the floor are clamped up to the floor.
    #[serde(default)]
    pub batch_size: usize,

    /// Seed for the label-propagation node shuffle. Fixed so repeated
    /// passes over identical inputs produce identical partitions.
    #[serde(default = "default_shuffle_seed")]
    pub shuffle_seed: u64,
}

fn default_model() -> i64 {
    1
}

fn default_sensitivity() -> f32 {
    0.4
}

fn default_minimum_confidence() -> f32 {
    0.99
}

fn default_shuffle_seed() -> u64 {
    0x5eed_face
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            sensitivity: default_sensitivity(),
            minimum_confidence: default_minimum_confidence(),
            batch_size: 0,
            shuffle_seed: default_shuffle_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessConfig {
    /// A user with no persons yet is clustered once this many faces exist.
    #[serde(default = "default_bootstrap_face_count")]
    pub bootstrap_face_count: u64,

    /// ...or once this fraction of the user's images is processed.
    #[serde(default = "default_bootstrap_processed_ratio")]
    pub bootstrap_processed_ratio: f64,

    /// With persons present, re-cluster when at least this many faces have
    /// no person assigned.
    #[serde(default = "default_unassigned_face_count")]
    pub unassigned_face_count: u64,

    /// ...or when any unassigned face is older than this many minutes.
    #[serde(default = "default_unassigned_age_minutes")]
    pub unassigned_age_minutes: i64,
}

fn default_bootstrap_face_count() -> u64 {
    1000
}

fn default_bootstrap_processed_ratio() -> f64 {
    0.95
}

fn default_unassigned_face_count() -> u64 {
    25
}

fn default_unassigned_age_minutes() -> i64 {
    120
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            bootstrap_face_count: default_bootstrap_face_count(),
            bootstrap_processed_ratio: default_bootstrap_processed_ratio(),
            unassigned_face_count: default_unassigned_face_count(),
            unassigned_age_minutes: default_unassigned_age_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Wall-clock budget for one pipeline pass, in seconds. 0 disables the
    /// budget. Checked only at suspension points, never mid-algorithm.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Path of the advisory lock file that enforces a single running
    /// pipeline instance system-wide.
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
}

fn default_timeout_seconds() -> u64 {
    900
}

fn default_lock_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("visage.lock")
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            lock_path: default_lock_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("visage")
        .join("visage.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            clustering: ClusteringConfig::default(),
            staleness: StalenessConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create a default config at the requested location
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("visage")
            .join("config.toml")
    }
}
