//! Baseline persistence
//!
//! A baseline is the last accepted fingerprint for a (component, viewport)
//! pair. Stores only need to load and overwrite single entries.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{VisageError, VisageResult};
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaselineKey {
    pub component: String,
    pub viewport: String,
}

impl BaselineKey {
    pub fn new(component: impl Into<String>, viewport: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            viewport: viewport.into(),
        }
    }

    pub fn of(fingerprint: &Fingerprint) -> Self {
        Self::new(&fingerprint.component, &fingerprint.viewport)
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.component, self.viewport)
    }
}

/// Persistence for baseline fingerprints
pub trait BaselineStore: Send {
    fn load(&self, key: &BaselineKey) -> VisageResult<Option<Fingerprint>>;

    /// Store `fingerprint` under `key`, replacing any previous entry
    fn store(&mut self, key: &BaselineKey, fingerprint: &Fingerprint) -> VisageResult<()>;
}

/// One JSON document per key in a directory
#[derive(Debug, Clone)]
pub struct FileBaselineStore {
    dir: PathBuf,
}

impl FileBaselineStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the baseline for `key`
    pub fn entry_path(&self, key: &BaselineKey) -> PathBuf {
        let name: String = key
            .to_string()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl BaselineStore for FileBaselineStore {
    fn load(&self, key: &BaselineKey) -> VisageResult<Option<Fingerprint>> {
        let path = self.entry_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(VisageError::ReadFile { path, source }),
        };

        let fingerprint: Fingerprint = serde_json::from_str(&content)
            .map_err(|e| VisageError::Baseline(format!("{}: {}", path.display(), e)))?;
        if BaselineKey::of(&fingerprint) != *key {
            return Err(VisageError::Baseline(format!(
                "{} holds the baseline for {}, expected {}",
                path.display(),
                BaselineKey::of(&fingerprint),
                key
            )));
        }
        Ok(Some(fingerprint))
    }

    fn store(&mut self, key: &BaselineKey, fingerprint: &Fingerprint) -> VisageResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(fingerprint)?)?;
        std::fs::rename(&tmp_path, &path)?;

        debug!("Stored baseline {} at {}", key, path.display());
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryBaselineStore {
    entries: HashMap<BaselineKey, Fingerprint>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self, key: &BaselineKey) -> VisageResult<Option<Fingerprint>> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &BaselineKey, fingerprint: &Fingerprint) -> VisageResult<()> {
        self.entries.insert(key.clone(), fingerprint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fingerprint(component: &str, visual: &str) -> Fingerprint {
        Fingerprint {
            component: component.into(),
            viewport: "full".into(),
            visual_hash: visual.into(),
            markup_hash: "m".into(),
            style_hash: "s".into(),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_file_store_missing_entry() {
        let tmp = TempDir::new().unwrap();
        let store = FileBaselineStore::new(tmp.path().join("baselines"));
        let key = BaselineKey::new("atoms-button--primary", "full");
        assert!(store.load(&key).unwrap().is_none());
    }

    #[test]
    fn test_file_store_overwrites() {
        let tmp = TempDir::new().unwrap();
        let mut store = FileBaselineStore::new(tmp.path().join("baselines"));
        let first = fingerprint("atoms-button--primary", "00ff");
        let key = BaselineKey::of(&first);

        store.store(&key, &first).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(first));

        let second = fingerprint("atoms-button--primary", "ff00");
        store.store(&key, &second).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(second));
        assert!(!store.entry_path(&key).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_entry_path_is_sanitized() {
        let store = FileBaselineStore::new("/baselines");
        let key = BaselineKey::new("drafts-odd name--x/y", "full");
        assert_eq!(
            store.entry_path(&key),
            PathBuf::from("/baselines/drafts-odd_name--x_y@full.json")
        );
    }

    #[test]
    fn test_file_store_rejects_mismatched_entry() {
        let tmp = TempDir::new().unwrap();
        let mut store = FileBaselineStore::new(tmp.path());
        let key = BaselineKey::new("atoms-button--primary", "full");
        store.store(&key, &fingerprint("atoms-card--default", "00")).unwrap();

        assert!(matches!(store.load(&key), Err(VisageError::Baseline(_))));
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryBaselineStore::new();
        let fp = fingerprint("atoms-button--primary", "00ff");
        store.store(&BaselineKey::of(&fp), &fp).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&BaselineKey::of(&fp)).unwrap(), Some(fp));
    }
}
