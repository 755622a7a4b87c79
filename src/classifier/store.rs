//! Model artifact persistence. The scaler and the SVM are written as two
//! files but only ever read back together.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::scaler::StandardScaler;
use super::svm::SvmModel;
use crate::error::ClassifierError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub pair_token: u64,
    pub n_features: usize,
    pub scaler: StandardScaler,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub pair_token: u64,
    pub n_features: usize,
    pub model: SvmModel,
}

/// A scaler and model from the same training run.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelArtifacts {
    pub scaler: ScalerArtifact,
    pub model: ModelArtifact,
}

impl ModelArtifacts {
    pub fn check_pair(&self) -> Result<(), ClassifierError> {
        if self.scaler.pair_token != self.model.pair_token {
            return Err(ClassifierError::PairMismatch(format!(
                "scaler token {:#x} does not match model token {:#x}",
                self.scaler.pair_token, self.model.pair_token
            )));
        }
        if self.scaler.n_features != self.model.n_features
            || self.scaler.scaler.n_features() != self.scaler.n_features
        {
            return Err(ClassifierError::PairMismatch(format!(
                "scaler expects {} features, model expects {}",
                self.scaler.n_features, self.model.n_features
            )));
        }
        Ok(())
    }
}

pub trait ModelStore: Send + Sync {
    fn save_pair(&self, key: &str, artifacts: &ModelArtifacts) -> Result<(), ClassifierError>;
    fn load_pair(&self, key: &str) -> Result<ModelArtifacts, ClassifierError>;
    fn exists(&self, key: &str) -> bool;
}

/// Maps a user identity to a file-system safe key. Every byte outside
/// `[A-Za-z0-9.-]`, `_` included, becomes `_xx` (lowercase hex), so two
/// identities never share a key.
pub fn model_key(identity: &str) -> String {
    let mut key = String::with_capacity(identity.len() + 6);
    key.push_str("model_");
    for byte in identity.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("_{byte:02x}"));
        }
    }
    key
}

/// `{dir}/{key}.json` plus `{dir}/{key}_scaler.json`.
#[derive(Clone, Debug)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn scaler_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_scaler.json"))
    }
}

impl ModelStore for FileModelStore {
    fn save_pair(&self, key: &str, artifacts: &ModelArtifacts) -> Result<(), ClassifierError> {
        artifacts.check_pair()?;
        fs::create_dir_all(&self.dir)?;
        // Scaler first; a model file without its scaler is rejected on load.
        fs::write(
            self.scaler_path(key),
            serde_json::to_string_pretty(&artifacts.scaler)?,
        )?;
        fs::write(
            self.model_path(key),
            serde_json::to_string_pretty(&artifacts.model)?,
        )?;
        info!("saved model pair {key} to {}", self.dir.display());
        Ok(())
    }

    fn load_pair(&self, key: &str) -> Result<ModelArtifacts, ClassifierError> {
        let model_path = self.model_path(key);
        let scaler_path = self.scaler_path(key);
        match (model_path.exists(), scaler_path.exists()) {
            (true, true) => {}
            (true, false) => {
                return Err(ClassifierError::PairMismatch(format!(
                    "{} has no scaler",
                    model_path.display()
                )))
            }
            (false, true) => {
                return Err(ClassifierError::PairMismatch(format!(
                    "{} has no model",
                    scaler_path.display()
                )))
            }
            (false, false) => {
                return Err(ClassifierError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no model stored under {key}"),
                )))
            }
        }
        let model: ModelArtifact = serde_json::from_str(&fs::read_to_string(&model_path)?)?;
        let scaler: ScalerArtifact = serde_json::from_str(&fs::read_to_string(&scaler_path)?)?;
        let artifacts = ModelArtifacts { scaler, model };
        artifacts.check_pair()?;
        debug!("loaded model pair {key}");
        Ok(artifacts)
    }

    fn exists(&self, key: &str) -> bool {
        self.model_path(key).exists() && self.scaler_path(key).exists()
    }
}

#[derive(Debug, Default)]
pub struct MemoryModelStore {
    pairs: Mutex<HashMap<String, ModelArtifacts>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for MemoryModelStore {
    fn save_pair(&self, key: &str, artifacts: &ModelArtifacts) -> Result<(), ClassifierError> {
        artifacts.check_pair()?;
        self.pairs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), artifacts.clone());
        Ok(())
    }

    fn load_pair(&self, key: &str) -> Result<ModelArtifacts, ClassifierError> {
        let pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
        let artifacts = pairs.get(key).cloned().ok_or_else(|| {
            ClassifierError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no model stored under {key}"),
            ))
        })?;
        artifacts.check_pair()?;
        Ok(artifacts)
    }

    fn exists(&self, key: &str) -> bool {
        self.pairs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn artifacts(token: u64) -> ModelArtifacts {
        let x = array![[0.0, 0.0], [1.0, 1.0], [0.1, 0.0], [0.9, 1.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        let model = SvmModel::fit(
            &scaler.transform(&x).unwrap(),
            &[-1.0, 1.0, -1.0, 1.0],
            Default::default(),
        )
        .unwrap();
        ModelArtifacts {
            scaler: ScalerArtifact {
                pair_token: token,
                n_features: 2,
                scaler,
            },
            model: ModelArtifact {
                pair_token: token,
                n_features: 2,
                model,
            },
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mindstate-models-{}", rand::random::<u64>()))
    }

    #[test]
    fn key_is_escaped() {
        assert_eq!(model_key("ada@lab/1"), "model_ada_40lab_2f1");
        assert_eq!(model_key("bob.smith-2"), "model_bob.smith-2");
    }

    #[test]
    fn distinct_identities_get_distinct_keys() {
        assert_ne!(model_key("ada@lab"), model_key("ada_lab"));
        assert_ne!(model_key("a_40b"), model_key("a@b"));
        assert_ne!(model_key("é"), model_key("_c3_a9"));
    }

    #[test]
    fn file_store_round_trips_a_pair() {
        let dir = temp_dir();
        let store = FileModelStore::new(&dir);
        let saved = artifacts(7);
        store.save_pair("model_u", &saved).unwrap();
        assert!(store.exists("model_u"));
        assert_eq!(store.load_pair("model_u").unwrap(), saved);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_scaler_is_a_pair_mismatch() {
        let dir = temp_dir();
        let store = FileModelStore::new(&dir);
        store.save_pair("model_u", &artifacts(7)).unwrap();
        fs::remove_file(dir.join("model_u_scaler.json")).unwrap();
        assert!(!store.exists("model_u"));
        assert!(matches!(
            store.load_pair("model_u"),
            Err(ClassifierError::PairMismatch(_))
        ));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn scaler_from_another_run_is_rejected() {
        let dir = temp_dir();
        let store = FileModelStore::new(&dir);
        store.save_pair("model_a", &artifacts(1)).unwrap();
        store.save_pair("model_b", &artifacts(2)).unwrap();
        fs::copy(dir.join("model_b_scaler.json"), dir.join("model_a_scaler.json")).unwrap();
        assert!(matches!(
            store.load_pair("model_a"),
            Err(ClassifierError::PairMismatch(_))
        ));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn memory_store_refuses_mismatched_pairs() {
        let store = MemoryModelStore::new();
        let mut bad = artifacts(1);
        bad.model.pair_token = 2;
        assert!(store.save_pair("k", &bad).is_err());
        assert!(!store.exists("k"));
        assert!(store.load_pair("k").is_err());
    }
}
