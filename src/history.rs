use crate::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub description: String,
    pub actor: String,
    /// Peer identity of the workstation the action came from.
    pub origin: String,
    pub time: f64,
}
impl HistoryEntry {
    fn is_complete(&self) -> bool {
        !self.action.is_empty() && !self.actor.is_empty() && !self.origin.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("invalid history record: action {action:?}, actor {actor:?}, origin {origin:?}")]
    InvalidRecord {
        action: String,
        actor: String,
        origin: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounded log of recent daemon activity, oldest first.
#[derive(Debug)]
pub struct HistoryLog {
    records: VecDeque<HistoryEntry>,
    capacity: usize,
}
impl HistoryLog {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Reads the persisted log. An unreadable log is replaced by an empty one on disk.
    pub fn load<S: Store + ?Sized>(store: &mut S, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        match store.load_history() {
            Ok(records) => {
                let complete: Vec<_> =
                    records.into_iter().filter(HistoryEntry::is_complete).collect();
                let skip = complete.len().saturating_sub(capacity);
                log.records.extend(complete.into_iter().skip(skip));
            }
            Err(e) => {
                log::warn!("history unreadable, starting empty: {e}");
                if let Err(e) = store.save_history(&[]) {
                    log::error!("could not reset history: {e}");
                }
            }
        }
        log
    }

    /// Appends and persists. On a store error the entry is still kept in memory.
    pub fn append<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        action: &str,
        description: &str,
        actor: &str,
        origin: &str,
        time: Option<f64>,
    ) -> Result<(), HistoryError> {
        let entry = HistoryEntry {
            action: action.to_owned(),
            description: description.to_owned(),
            actor: actor.to_owned(),
            origin: origin.to_owned(),
            time: time.unwrap_or_else(crate::types::unix_time),
        };
        if !entry.is_complete() {
            return Err(HistoryError::InvalidRecord {
                action: entry.action,
                actor: entry.actor,
                origin: entry.origin,
            });
        }
        self.records.push_back(entry);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        store.save_history(self.records.make_contiguous())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn records(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.records.iter()
    }
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.records.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonStore, MemoryStore};
    use tempfile::tempdir;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::new(HistoryLog::DEFAULT_CAPACITY);
        for n in 0..=100 {
            let description = format!("entry {n}");
            log.append(&mut store, "lock", &description, "alice", "ws1", Some(n as f64)).unwrap();
        }
        assert_eq!(log.len(), 100);
        assert!(log.records().all(|r| r.description != "entry 0"));
        assert_eq!(log.records().next().unwrap().description, "entry 1");
        assert_eq!(log.latest().unwrap().description, "entry 100");
        assert_eq!(store.history().len(), 100);
    }

    #[test]
    fn rejects_incomplete_records() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::new(10);
        assert!(matches!(
            log.append(&mut store, "", "x", "alice", "ws1", None),
            Err(HistoryError::InvalidRecord { .. })
        ));
        assert!(log.append(&mut store, "login", "", "", "ws1", None).is_err());
        assert!(log.append(&mut store, "login", "", "alice", "", None).is_err());
        assert!(log.is_empty());
        assert_eq!(store.writes(), 0);

        log.append(&mut store, "login", "", "alice", "ws1", None).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn corrupt_log_heals_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("history.json"), "<history>").unwrap();
        let mut store = JsonStore::open(dir.path()).unwrap();

        let log = HistoryLog::load(&mut store, 100);
        assert!(log.is_empty());
        assert!(store.load_history().unwrap().is_empty());
    }

    #[test]
    fn reload_keeps_the_newest_entries() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::new(5);
        for n in 0..5 {
            log.append(&mut store, "lock", &n.to_string(), "alice", "ws1", None).unwrap();
        }
        let writes = store.writes();
        let smaller = HistoryLog::load(&mut store, 3);
        assert_eq!(store.writes(), writes);
        let kept: Vec<_> = smaller.records().map(|r| r.description.as_str()).collect();
        assert_eq!(kept, vec!["2", "3", "4"]);
    }
}
