//! Runtime configuration, loaded from a JSON file with per-section defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Nominal device sampling rate; one window is exactly this many samples.
pub const FREQ: usize = 512;

/// Largest valid ADC code the sensor reports.
pub const DEVICE_MAX_CODE: i32 = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub preprocess: PreprocessConfig,
    pub classifier: ClassifierConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    pub sampling_rate: f64,
    /// Line-noise frequency removed by the notch stage.
    pub notch_freq: f64,
    pub notch_q: f64,
    pub lowcut: f64,
    pub highcut: f64,
    /// Butterworth order of each band edge.
    pub order: usize,
    /// Codes above this are treated as saturated.
    pub max_code: i32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            sampling_rate: FREQ as f64,
            notch_freq: 50.0,
            notch_q: 30.0,
            lowcut: 0.5,
            highcut: 30.0,
            order: 4,
            max_code: DEVICE_MAX_CODE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// SVM soft-margin penalty.
    pub c: f64,
    pub test_fraction: f64,
    pub seed: u64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            c: 100.0,
            test_fraction: 0.2,
            seed: 42,
            tolerance: 1e-3,
            max_iterations: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of per-second predictions folded into one smoothed output.
    pub vote_batch: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { vote_batch: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
        }
    }
}
