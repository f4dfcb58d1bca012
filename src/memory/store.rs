//! Durable key/value store for stage outputs.
//!
//! One flat JSON object keyed by stage name, rewritten in full after every
//! write. Writes overwrite; there is no history.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use super::semantic::{Embedder, HashEmbedder, SemanticMemory};

/// File name of the persisted mapping inside the memory directory.
pub const STORE_FILE: &str = "structured_memory.json";

/// Errors constructing a store. Once open, a store never returns errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create memory directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Memory path {0} exists and is not a directory")]
    NotADirectory(PathBuf),
}

/// Key/value memory shared by all stages of a run.
///
/// Values are JSON trees. Persistence failures are logged and swallowed so
/// the pipeline keeps moving.
#[derive(Debug)]
pub struct StructuredStore {
    dir: PathBuf,
    path: PathBuf,
    entries: Map<String, Value>,
    semantic: SemanticMemory,
}

impl StructuredStore {
    /// Opens the store rooted at `dir` with the default embedder.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_embedder(dir, Box::new(HashEmbedder::default()))
    }

    /// Opens the store rooted at `dir`, creating the directory if needed.
    ///
    /// A previously persisted mapping is reloaded best-effort: a missing,
    /// unreadable or corrupt file yields an empty store. Failing to create
    /// the directory is the only error.
    pub fn open_with_embedder(
        dir: impl AsRef<Path>,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() && !dir.is_dir() {
            return Err(StoreError::NotADirectory(dir));
        }
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(STORE_FILE);
        let entries = load_entries(&path);
        let semantic = SemanticMemory::open(&dir, embedder);

        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened structured store");

        Ok(Self {
            dir,
            path,
            entries,
            semantic,
        })
    }

    /// Stores `value` under `key`, replacing any previous value, then
    /// persists the whole mapping.
    pub fn add(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        tracing::debug!(key = %key, "Storing entry");
        self.entries.insert(key, value);
        self.persist();
    }

    /// Returns the stored value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the stored value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.entries.get(key).cloned().unwrap_or(default)
    }

    /// Snapshot of every entry.
    pub fn get_all(&self) -> Map<String, Value> {
        self.entries.clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a free-text note for similarity recall.
    pub fn add_summary(&mut self, text: impl Into<String>, metadata: BTreeMap<String, String>) {
        self.semantic.add_summary(text, metadata);
    }

    /// Returns up to `k` recorded notes most similar to `text`.
    pub fn query(&self, text: &str, k: usize) -> Vec<String> {
        self.semantic.query(text, k)
    }

    pub fn semantic(&self) -> &SemanticMemory {
        &self.semantic
    }

    fn persist(&self) {
        let result = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&self.path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist structured store"
            );
        }
    }
}

fn load_entries(path: &Path) -> Map<String, Value> {
    if !path.exists() {
        return Map::new();
    }
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not read structured store; starting empty"
            );
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(entries)) => entries,
        Ok(_) => {
            tracing::warn!(
                path = %path.display(),
                "Structured store is not a mapping; starting empty"
            );
            Map::new()
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Corrupt structured store; starting empty"
            );
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_add_then_get() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StructuredStore::open(dir.path()).expect("open");
        let value = json!({"name": "Soil Carbon", "sources": ["a", "b"], "confidence": 0.8});

        store.add("domain", value.clone());
        assert_eq!(store.get("domain"), Some(&value));
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.get_or("missing", json!([])), json!([]));
    }

    #[test]
    fn test_add_overwrites() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StructuredStore::open(dir.path()).expect("open");
        store.add("questions", json!(["first"]));
        store.add("questions", json!(["second"]));
        assert_eq!(store.get("questions"), Some(&json!(["second"])));
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let value = json!({"metadata": [{"rows": 12, "column_names": ["x"]}], "summary": "ok"});
        {
            let mut store = StructuredStore::open(dir.path()).expect("open");
            store.add("data", value.clone());
        }
        let reopened = StructuredStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.get("data"), Some(&value));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join(STORE_FILE), "{\"domain\": ").expect("write");
        let store = StructuredStore::open(dir.path()).expect("open");
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_non_mapping_file_starts_empty() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join(STORE_FILE), "[1, 2, 3]").expect("write");
        let store = StructuredStore::open(dir.path()).expect("open");
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_open_fails_when_path_is_a_file() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("occupied");
        fs::write(&file, "x").expect("write");
        let err = StructuredStore::open(&file).expect_err("file is not a directory");
        assert!(matches!(err, StoreError::NotADirectory(_)));
    }

    #[test]
    fn test_write_failure_keeps_value_in_memory() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StructuredStore::open(dir.path()).expect("open");
        // A directory at the file path makes every persist fail.
        fs::create_dir(store.path()).expect("block store file");
        store.add("critique", json!({"iterate": true}));
        assert_eq!(store.get("critique"), Some(&json!({"iterate": true})));
    }

    #[test]
    fn test_summaries_are_queryable() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StructuredStore::open(dir.path()).expect("open");
        store.add_summary(
            "Paper written to results/final_paper",
            BTreeMap::from([("stage".to_string(), "paper".to_string())]),
        );
        assert_eq!(store.query("final paper", 1).len(), 1);
    }
}
