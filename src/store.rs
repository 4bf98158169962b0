//! Where registries and the history log live between runs.
//!
//! The daemon only talks to the [`Store`] trait. [`JsonStore`] keeps one JSON
//! document per workstation plus `history.json` in a data directory.
//! [`MemoryStore`] keeps everything in memory and counts writes.

use crate::history::HistoryEntry;
use crate::registry::LockRegistry;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("store is refusing writes")]
    Unavailable,
}

/// Storage port. Every call is synchronous: once `save_*` returns `Ok` the data is durable.
pub trait Store {
    fn save_registry(&mut self, registry: &LockRegistry) -> Result<(), StoreError>;
    /// One result per stored registry, so a corrupt document does not hide the rest.
    fn load_registries(&self) -> Result<Vec<Result<LockRegistry, StoreError>>, StoreError>;
    fn save_history(&mut self, records: &[HistoryEntry]) -> Result<(), StoreError>;
    fn load_history(&self) -> Result<Vec<HistoryEntry>, StoreError>;
}

#[derive(Serialize)]
struct HistoryDocument<'a> {
    records: &'a [HistoryEntry],
}
#[derive(Deserialize)]
struct OwnedHistoryDocument {
    records: Vec<HistoryEntry>,
}

const REGISTRY_SUFFIX: &str = ".registry.json";
const HISTORY_FILE: &str = "history.json";

#[derive(Debug)]
pub struct JsonStore {
    dir: PathBuf,
}
impl JsonStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write { path: dir.clone(), source })?;
        Ok(Self { dir })
    }
    pub fn dir(&self) -> &Path {
        &self.dir
    }
    /// Bytes outside `[A-Za-z0-9._-]` are percent-escaped, so distinct names never share a file.
    pub fn registry_path(&self, name: &str) -> PathBuf {
        let mut stem = String::with_capacity(name.len());
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_') {
                stem.push(b as char);
            } else {
                stem.push_str(&format!("%{b:02X}"));
            }
        }
        self.dir.join(stem + REGISTRY_SUFFIX)
    }
    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(StoreError::Serialize)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Write {
            path: path.to_owned(),
            source,
        })
    }
    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
        let bytes = fs::read(path).map_err(|source| StoreError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}
impl Store for JsonStore {
    fn save_registry(&mut self, registry: &LockRegistry) -> Result<(), StoreError> {
        Self::write_json(&self.registry_path(registry.name()), registry)
    }
    fn load_registries(&self) -> Result<Vec<Result<LockRegistry, StoreError>>, StoreError> {
        let read_err = |source| StoreError::Read { path: self.dir.clone(), source };
        let mut paths = vec![];
        for entry in fs::read_dir(&self.dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            let is_registry = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.to_ascii_lowercase().ends_with(REGISTRY_SUFFIX));
            if is_registry {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths.iter().map(|p| Self::read_json(p)).collect())
    }
    fn save_history(&mut self, records: &[HistoryEntry]) -> Result<(), StoreError> {
        Self::write_json(&self.history_path(), &HistoryDocument { records })
    }
    fn load_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Self::read_json::<OwnedHistoryDocument>(&self.history_path()).map(|doc| doc.records)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    registries: BTreeMap<String, LockRegistry>,
    history: Vec<HistoryEntry>,
    writes: usize,
    failing: bool,
}
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
    /// Number of successful `save_*` calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
    pub fn fail_writes(&mut self, failing: bool) {
        self.failing = failing;
    }
    pub fn registry(&self, name: &str) -> Option<&LockRegistry> {
        self.registries.get(name)
    }
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
    fn check(&mut self) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable);
        }
        self.writes += 1;
        Ok(())
    }
}
impl Store for MemoryStore {
    fn save_registry(&mut self, registry: &LockRegistry) -> Result<(), StoreError> {
        self.check()?;
        self.registries.insert(registry.name().to_owned(), registry.clone());
        Ok(())
    }
    fn load_registries(&self) -> Result<Vec<Result<LockRegistry, StoreError>>, StoreError> {
        Ok(self.registries.values().cloned().map(Ok).collect())
    }
    fn save_history(&mut self, records: &[HistoryEntry]) -> Result<(), StoreError> {
        self.check()?;
        self.history = records.to_vec();
        Ok(())
    }
    fn load_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.history.clone())
    }
}
