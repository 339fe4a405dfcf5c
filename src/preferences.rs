use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// App-level preference store. The migration chain writes values extracted
/// from legacy rows into it (e.g. the bitcoin derivation preference); the rest
/// of the app reads them back outside of this crate.
pub trait PreferenceStore: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn get(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    values: BTreeMap<String, String>,
}

/// JSON-file backed preferences, one file per app dir.
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    pub fn new(app_dir: &Path) -> Self {
        let path = app_dir.join("preferences.json");
        let values = fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<PreferenceFile>(&bytes).ok())
            .map(|file| file.values)
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let file = PreferenceFile {
            values: values.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)
            .with_context(|| format!("write preferences to {}", self.path.display()))?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = match self.values.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn get(&self, key: &str) -> Option<String> {
        let values = match self.values.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.get(key).cloned()
    }
}

/// In-memory preferences for tests.
#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = match self.values.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        let values = match self.values.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.get(key).cloned()
    }
}
