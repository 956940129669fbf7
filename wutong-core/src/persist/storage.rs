//! Durable client storage slots.
//!
//! A slot store is a flat key → JSON document map, the client's equivalent of
//! browser local storage. Every write replaces the whole document.

use super::PersistError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

/// Key/value storage for serialized snapshots.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// The document under `key`, if any.
    async fn read(&self, key: &str) -> Result<Option<String>, PersistError>;

    /// Replace the document under `key`.
    async fn write(&self, key: &str, value: &str) -> Result<(), PersistError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), PersistError>;
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write never leaves a half-written slot behind.
#[derive(Debug, Clone)]
pub struct FileSlots {
    dir: PathBuf,
}

impl FileSlots {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(key)))
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl SlotStore for FileSlots {
    async fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let staging = self.dir.join(format!(".{}.tmp", sanitize(key)));
        fs::write(&staging, value).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Slots held in memory. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySlots {
    slots: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SlotStore for MemorySlots {
    async fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.slots.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.slots.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_sanitizes_key() {
        let slots = FileSlots::new("/saves");
        let path = slots.path_for("wutong/Mountain Saves!");
        assert!(path.to_string_lossy().ends_with("wutong_Mountain_Saves_.json"));
    }

    #[tokio::test]
    async fn test_file_slots_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let slots = FileSlots::new(temp_dir.path().join("nested"));

        assert_eq!(slots.read("autosave").await.unwrap(), None);

        slots.write("autosave", "{\"a\":1}").await.unwrap();
        assert_eq!(
            slots.read("autosave").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        slots.write("autosave", "{\"a\":2}").await.unwrap();
        assert_eq!(
            slots.read("autosave").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        assert!(!temp_dir.path().join("nested").join(".autosave.tmp").exists());

        slots.remove("autosave").await.unwrap();
        assert_eq!(slots.read("autosave").await.unwrap(), None);
        slots.remove("autosave").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_slots_share_contents() {
        let slots = MemorySlots::new();
        let other = slots.clone();

        slots.write("k", "v").await.unwrap();
        assert_eq!(other.read("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(other.len().await, 1);

        other.remove("k").await.unwrap();
        assert!(slots.is_empty().await);
    }
}
