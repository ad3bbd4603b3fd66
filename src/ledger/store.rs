use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Durable backing for the position ledger.
pub trait StateStore: Send + Sync {
    /// Read the persisted snapshot. `Ok(None)` when nothing has been
    /// written yet.
    fn load(&self) -> Result<Option<String>>;
    /// Atomically replace the snapshot.
    fn replace(&self, contents: &str) -> Result<()>;
}

/// JSON file store with write-temp-then-rename replacement, so a crash
/// mid-write never leaves a torn snapshot behind.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    fn replace(&self, contents: &str) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStateStore {
    contents: std::sync::Mutex<Option<String>>,
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.contents.lock().unwrap().clone())
    }

    fn replace(&self, contents: &str) -> Result<()> {
        *self.contents.lock().unwrap() = Some(contents.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_replace_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        store.replace(r#"{"positions":{}}"#).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), r#"{"positions":{}}"#);

        store.replace(r#"{"positions":{"A":1}}"#).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), r#"{"positions":{"A":1}}"#);
    }

    #[test]
    fn test_file_store_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        store.replace("{}").unwrap();
        assert!(!dir.path().join("state.tmp").exists());
    }
}
