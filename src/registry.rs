use crate::prelude::*;
use crate::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Peer identities compare case-insensitively.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Every lock held by one workstation, grouped by space.
///
/// Each successful mutation hands the whole registry to the [`Store`] before
/// returning. If that write fails the in-memory change is undone, so what a client
/// was told is locked is always what is on disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockRegistry {
    name: String,
    spaces: BTreeMap<String, Vec<Lock>>,
}
impl LockRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize_name(name),
            spaces: BTreeMap::new(),
        }
    }
    /// Fix up a registry read back from storage. Never writes.
    pub(crate) fn normalized(mut self) -> Self {
        self.name = normalize_name(&self.name);
        self.spaces.retain(|_, locks| !locks.is_empty());
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn spaces(&self) -> impl Iterator<Item = &str> {
        self.spaces.keys().map(String::as_str)
    }
    pub fn locks(&self, space: &str) -> &[Lock] {
        self.spaces.get(space).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn lock_count(&self, space: &str) -> usize {
        self.locks(space).len()
    }
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    /// Returns `Ok(false)` when this registry already holds exactly `rect` in `space`.
    /// Overlap with its own locks is allowed.
    pub fn add_lock<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        space: &str,
        rect: Rect,
        owner: &str,
        description: &str,
        time: Option<f64>,
    ) -> Result<bool, StoreError> {
        if self.locks(space).iter().any(|lock| lock.rect == rect) {
            return Ok(false);
        }
        self.spaces.entry(space.to_owned()).or_default().push(Lock {
            rect,
            owner: owner.to_owned(),
            description: description.to_owned(),
            time: time.unwrap_or_else(unix_time),
        });
        if let Err(e) = store.save_registry(self) {
            if let Some(locks) = self.spaces.get_mut(space) {
                locks.pop();
                if locks.is_empty() {
                    self.spaces.remove(space);
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Removes the first lock whose rect equals `rect` exactly.
    pub fn remove_lock<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        space: &str,
        rect: Rect,
    ) -> Result<Option<Lock>, StoreError> {
        let Some(locks) = self.spaces.get_mut(space) else {
            return Ok(None);
        };
        let Some(idx) = locks.iter().position(|lock| lock.rect == rect) else {
            return Ok(None);
        };
        let removed = locks.remove(idx);
        let emptied = locks.is_empty();
        if emptied {
            self.spaces.remove(space);
        }
        if let Err(e) = store.save_registry(self) {
            self.spaces.entry(space.to_owned()).or_default().insert(idx, removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Drops every lock in `space`. Returns how many went away.
    pub fn clear_space<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        space: &str,
    ) -> Result<usize, StoreError> {
        let Some(locks) = self.spaces.remove(space) else {
            return Ok(0);
        };
        if let Err(e) = store.save_registry(self) {
            self.spaces.insert(space.to_owned(), locks);
            return Err(e);
        }
        Ok(locks.len())
    }

    pub fn clear<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<usize, StoreError> {
        let spaces = core::mem::take(&mut self.spaces);
        if let Err(e) = store.save_registry(self) {
            self.spaces = spaces;
            return Err(e);
        }
        Ok(spaces.values().map(Vec::len).sum())
    }

    pub fn conflicting_lock(&self, space: &str, rect: &Rect) -> Option<&Lock> {
        self.locks(space).iter().find(|lock| lock.rect.intersects(rect))
    }
    pub fn intersects_any(&self, space: &str, rect: &Rect) -> bool {
        self.conflicting_lock(space, rect).is_some()
    }
}
