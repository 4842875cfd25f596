//! Durable per-attempt key-value state.
//!
//! Escalation counts and the force-submit flag must survive page loads within
//! an attempt, so they live behind this store capability instead of in-memory
//! globals. Keys are namespaced as `examsentry:<kind>:<attemptId>`.

use anyhow::{Context, Result};
use std::{collections::HashMap, fs, path::PathBuf, sync::RwLock};

pub const STORE_NAMESPACE: &str = "examsentry";

pub fn tab_switch_count_key(attempt_id: &str) -> String {
    format!("{STORE_NAMESPACE}:tab_switch_count:{attempt_id}")
}

pub fn force_submit_key(attempt_id: &str) -> String {
    format!("{STORE_NAMESPACE}:force_submit:{attempt_id}")
}

pub trait AttemptStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// JSON-file-backed store. Every mutation is persisted immediately so a page
/// navigation racing the write cannot lose state.
pub struct FileAttemptStore {
    path: PathBuf,
    data: RwLock<HashMap<String, String>>,
}

impl FileAttemptStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read attempt state from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, data: &HashMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write attempt state to {}", self.path.display()))
    }
}

impl AttemptStore for FileAttemptStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.insert(key.to_string(), value.to_string());
        self.persist(&guard)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        if guard.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and trace replay.
#[derive(Default)]
pub struct MemoryAttemptStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }
}
