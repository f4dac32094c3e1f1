//! Local key-value persistence with quota degradation.
//!
//! [`LocalStore`] never hands an error to its caller. When a write exceeds the
//! backend quota it keeps the last [`TRIMMED_ENTRY_COUNT`] entries, then strips
//! image payloads from them, then clears the key, logging each step.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stacky_logging::{stacky_debug, stacky_info, stacky_warn};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const CHAT_MESSAGES_KEY: &str = "chatMessages";
pub const RETURN_SESSION_ID_KEY: &str = "returnSessionId";
pub const CUSTOMER_INFO_KEY: &str = "customerInfo";
pub const CURRENT_STEP_KEY: &str = "currentStep";
pub const DEBUG_FLAG_KEY: &str = "stacky_debug";

pub const TRIMMED_ENTRY_COUNT: usize = 10;
/// Same order of magnitude as a browser origin's local storage.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

const IMAGE_FIELDS: [&str; 3] = ["image", "blobUrl", "s3Url"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn check_quota(others: usize, key: &str, value: &str, quota: usize) -> Result<(), StorageError> {
    let needed = others + key.len() + value.len();
    if needed > quota {
        return Err(StorageError::QuotaExceeded { needed, quota });
    }
    Ok(())
}

/// In-process backend with the same quota semantics as [`FileBackend`].
pub struct MemoryBackend {
    quota_bytes: usize,
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            quota_bytes,
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_BYTES)
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let others: usize = entries
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, stored)| existing.len() + stored.len())
            .sum();
        check_quota(others, key, value, self.quota_bytes)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
///
/// Values are written to a temp file and renamed into place, so a reader never
/// sees a half-written value.
pub struct FileBackend {
    dir: PathBuf,
    quota_bytes: usize,
}

impl FileBackend {
    pub fn new(dir: PathBuf, quota_bytes: usize) -> Self {
        Self { dir, quota_bytes }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for(key))
    }

    fn write_atomic(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(self.path_for(key)).map_err(|err| err.error)?;
        Ok(())
    }

    fn bytes_used_except(&self, key: &str) -> Result<usize, StorageError> {
        let skip = file_name_for(key);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut used = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == skip || !name.ends_with(".json") {
                continue;
            }
            let stem_len = name.len() - ".json".len();
            used += stem_len + usize::try_from(entry.metadata()?.len()).unwrap_or(usize::MAX);
        }
        Ok(used)
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let others = self.bytes_used_except(key)?;
        check_quota(others, key, value, self.quota_bytes)?;
        self.write_atomic(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn file_name_for(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.json")
}

/// How a [`LocalStore::save`] ended up being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored,
    /// Only the last [`TRIMMED_ENTRY_COUNT`] entries were kept.
    Trimmed,
    /// Trimmed and stripped of `image`, `blobUrl` and `s3Url`.
    ImagesStripped,
    /// Nothing fit; the key was removed.
    Cleared,
    /// The backend failed for a reason other than quota.
    Failed,
}

#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    pub fn save(&self, key: &str, value: &Value) -> SaveOutcome {
        match self.write(key, value) {
            Ok(()) => SaveOutcome::Stored,
            Err(StorageError::QuotaExceeded { needed, quota }) => {
                stacky_warn!(
                    "Storage quota exceeded saving '{}' ({} of {} bytes), degrading",
                    key,
                    needed,
                    quota
                );
                self.degrade(key, value)
            }
            Err(err) => {
                stacky_warn!("Failed to save '{}': {}", key, err);
                SaveOutcome::Failed
            }
        }
    }

    pub fn save_json<T: Serialize>(&self, key: &str, value: &T) -> SaveOutcome {
        match serde_json::to_value(value) {
            Ok(value) => self.save(key, &value),
            Err(err) => {
                stacky_warn!("Failed to serialize '{}': {}", key, err);
                SaveOutcome::Failed
            }
        }
    }

    /// `None` for missing keys and for values that no longer parse.
    pub fn load(&self, key: &str) -> Option<Value> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                stacky_warn!("Failed to read '{}': {}", key, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                stacky_warn!("Discarding unreadable '{}': {}", key, err);
                None
            }
        }
    }

    pub fn load_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.load(key)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                stacky_warn!("Stored '{}' has an unexpected shape: {}", key, err);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = self.backend.remove(key) {
            stacky_warn!("Failed to remove '{}': {}", key, err);
        } else {
            stacky_debug!("Removed '{}'", key);
        }
    }

    fn write(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        // Serializing a `Value` cannot fail.
        let text = serde_json::to_string(value).unwrap_or_default();
        self.backend.set(key, &text)
    }

    fn degrade(&self, key: &str, value: &Value) -> SaveOutcome {
        if let Value::Array(entries) = value {
            let start = entries.len().saturating_sub(TRIMMED_ENTRY_COUNT);
            let trimmed = Value::Array(entries[start..].to_vec());
            match self.write(key, &trimmed) {
                Ok(()) => {
                    stacky_info!("Saved '{}' trimmed to {} entries", key, entries.len() - start);
                    return SaveOutcome::Trimmed;
                }
                Err(StorageError::QuotaExceeded { .. }) => {
                    stacky_warn!("Trimmed '{}' still over quota, stripping images", key);
                }
                Err(err) => {
                    stacky_warn!("Failed to save trimmed '{}': {}", key, err);
                    return SaveOutcome::Failed;
                }
            }

            let stripped = strip_images(&trimmed);
            match self.write(key, &stripped) {
                Ok(()) => {
                    stacky_info!("Saved '{}' without images", key);
                    return SaveOutcome::ImagesStripped;
                }
                Err(StorageError::QuotaExceeded { .. }) => {
                    stacky_warn!("Image-free '{}' still over quota, clearing", key);
                }
                Err(err) => {
                    stacky_warn!("Failed to save image-free '{}': {}", key, err);
                    return SaveOutcome::Failed;
                }
            }
        }

        match self.backend.remove(key) {
            Ok(()) => {
                stacky_warn!("Cleared '{}' after quota exhaustion", key);
                SaveOutcome::Cleared
            }
            Err(err) => {
                stacky_warn!("Failed to clear '{}': {}", key, err);
                SaveOutcome::Failed
            }
        }
    }
}

fn strip_images(value: &Value) -> Value {
    match value {
        Value::Array(entries) => Value::Array(
            entries
                .iter()
                .map(|entry| match entry {
                    Value::Object(fields) => Value::Object(
                        fields
                            .iter()
                            .filter(|(name, _)| !IMAGE_FIELDS.contains(&name.as_str()))
                            .map(|(name, field)| (name.clone(), field.clone()))
                            .collect(),
                    ),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
