// src/store.rs
//! User records and labelled feature windows.
//!
//! The orchestrator only talks to [`DocumentStore`]; [`MemoryStore`] backs
//! tests and [`JsonFileStore`] keeps everything under one data directory:
//! `users.json` for the flags and `eeg_data.jsonl` with one example per line.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::features::FeatureVector;
use crate::types::Label;

/// Progress flags kept on the user record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFlags {
    pub focused_data_collected: bool,
    pub relaxed_data_collected: bool,
    pub model_trained: bool,
}

impl UserFlags {
    pub fn collected(&self, label: Label) -> bool {
        match label {
            Label::Focused => self.focused_data_collected,
            Label::Relaxing => self.relaxed_data_collected,
        }
    }

    pub fn set_collected(&mut self, label: Label) {
        match label {
            Label::Focused => self.focused_data_collected = true,
            Label::Relaxing => self.relaxed_data_collected = true,
        }
    }

    pub fn all_collected(&self) -> bool {
        Label::ALL.iter().all(|l| self.collected(*l))
    }
}

/// One stored window: who, what state, and its features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub identity: String,
    pub features: FeatureVector,
    pub label: Label,
}

pub trait DocumentStore: Send + Sync {
    /// `None` when the user has no record.
    fn user_flags(&self, identity: &str) -> Result<Option<UserFlags>, StoreError>;
    fn set_user_flags(&self, identity: &str, flags: UserFlags) -> Result<(), StoreError>;
    fn insert_example(&self, example: &LabeledExample) -> Result<(), StoreError>;
    fn examples_for(&self, identity: &str) -> Result<Vec<LabeledExample>, StoreError>;

    /// Creates an empty record if none exists and returns the current flags.
    fn ensure_user(&self, identity: &str) -> Result<UserFlags, StoreError> {
        match self.user_flags(identity)? {
            Some(flags) => Ok(flags),
            None => {
                self.set_user_flags(identity, UserFlags::default())?;
                Ok(UserFlags::default())
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    users: HashMap<String, UserFlags>,
    examples: Vec<LabeledExample>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn example_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.examples.len())
            .unwrap_or(0)
    }
}

impl DocumentStore for MemoryStore {
    fn user_flags(&self, identity: &str) -> Result<Option<UserFlags>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.users.get(identity).copied())
    }

    fn set_user_flags(&self, identity: &str, flags: UserFlags) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.users.insert(identity.to_string(), flags);
        Ok(())
    }

    fn insert_example(&self, example: &LabeledExample) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.examples.push(example.clone());
        Ok(())
    }

    fn examples_for(&self, identity: &str) -> Result<Vec<LabeledExample>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .examples
            .iter()
            .filter(|e| e.identity == identity)
            .cloned()
            .collect())
    }
}

const USERS_FILE: &str = "users.json";
const EXAMPLES_FILE: &str = "eeg_data.jsonl";

/// File-backed store; one process-local lock serializes all access.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_users(&self) -> Result<HashMap<String, UserFlags>, StoreError> {
        let path = self.dir.join(USERS_FILE);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl DocumentStore for JsonFileStore {
    fn user_flags(&self, identity: &str) -> Result<Option<UserFlags>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read_users()?.get(identity).copied())
    }

    fn set_user_flags(&self, identity: &str, flags: UserFlags) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut users = self.read_users()?;
        users.insert(identity.to_string(), flags);
        // Readers never see a half-written users file.
        let tmp = self.dir.join(format!("{USERS_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(&users)?)?;
        fs::rename(tmp, self.dir.join(USERS_FILE))?;
        Ok(())
    }

    fn insert_example(&self, example: &LabeledExample) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(EXAMPLES_FILE))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer(&mut w, example)?;
        writeln!(w)?;
        w.flush()?;
        debug!("stored {} example for {}", example.label, example.identity);
        Ok(())
    }

    fn examples_for(&self, identity: &str) -> Result<Vec<LabeledExample>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let path = self.dir.join(EXAMPLES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for line in BufReader::new(File::open(path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let example: LabeledExample = serde_json::from_str(&line)?;
            if example.identity == identity {
                out.push(example);
            }
        }
        Ok(out)
    }
}
