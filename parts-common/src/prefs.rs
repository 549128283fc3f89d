//! Flat boolean preference files.
//!
//! Each namespace is a single JSON object of `key -> bool` stored as
//! `<dir>/<namespace>.json`. Writes go straight to disk; a missing key is
//! meaningful ("not set"), so removal deletes the entry rather than storing
//! `false`.

use crate::error::CommonError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A namespace of persisted boolean flags.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    values: BTreeMap<String, bool>,
}

impl PreferenceStore {
    /// Open the `namespace` file inside `dir`, loading it if it exists.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, CommonError> {
        validate_key(namespace)?;
        Self::load_from(&dir.join(format!("{namespace}.json")))
    }

    /// Load a store from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, CommonError> {
        let values = if path.exists() {
            let content = fs::read_to_string(path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.values.get(key).copied()
    }

    /// Set a flag and write the file.
    pub fn put(&mut self, key: &str, value: bool) -> Result<(), CommonError> {
        validate_key(key)?;
        if self.values.get(key) == Some(&value) && self.path.exists() {
            return Ok(());
        }
        self.values.insert(key.to_string(), value);
        self.save()
    }

    /// Remove a flag. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool, CommonError> {
        if self.values.remove(key).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write the store, replacing the previous file atomically.
    fn save(&self) -> Result<(), CommonError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), CommonError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(CommonError::InvalidKey(key.to_string()))
    }
}
