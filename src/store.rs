//! Per-profile key/value storage.
//!
//! A [`PropertyStore`] keeps two maps behind one mutex: the committed view
//! that every read is served from, and the pending delta since the last
//! flush. Flushing is a two step protocol:
//!
//! 1. [`swap_changes`](PropertyStore::swap_changes) drains the delta;
//! 2. [`patch`](PropertyStore::patch) merges it into the file on disk.
//!
//! The merge re-reads the file under an advisory lock and applies only the
//! delta, so cooperating processes editing different keys of the same file
//! don't overwrite each other. Two processes editing the same key is last
//! writer wins.
//!
//! # Example
//!
//! ```rust,no_run
//! use profile_config::PropertyStore;
//!
//! # fn main() -> Result<(), profile_config::Error> {
//! let store = PropertyStore::open("./profiles/default.properties")?;
//! store.set("grandexchange.quickLookup", "true");
//!
//! if let Some(changes) = store.swap_changes() {
//!     store.patch(&changes)?;
//! }
//! # Ok(())
//! # }
//! ```
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    atomic::{self, LoadResult, ScopedFileLock},
    error::Result,
    properties,
    remote::ConfigPatch,
};

/// A drained pending-change set. `None` marks a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes(BTreeMap<String, Option<String>>);

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), Some(value.into()));
    }

    pub fn unset(&mut self, key: impl Into<String>) {
        self.0.insert(key.into(), None);
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<String>)> {
        self.0.iter()
    }

    pub fn apply_to(&self, map: &mut HashMap<String, String>) {
        for (key, value) in &self.0 {
            match value {
                Some(value) => {
                    map.insert(key.clone(), value.clone());
                }
                None => {
                    map.remove(key);
                }
            }
        }
    }

    pub fn to_patch(&self) -> ConfigPatch {
        let mut patch = ConfigPatch::default();
        for (key, value) in &self.0 {
            match value {
                Some(value) => {
                    patch.edit.insert(key.clone(), value.clone());
                }
                None => {
                    patch.unset.insert(key.clone());
                }
            }
        }
        patch
    }
}

#[derive(Debug, Default)]
struct Maps {
    committed: HashMap<String, String>,
    pending: BTreeMap<String, Option<String>>,
}

#[derive(Debug)]
pub struct PropertyStore {
    path: PathBuf,
    maps: Mutex<Maps>,
}

impl PropertyStore {
    /// Loads the file at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let committed = match atomic::read_if_exists(&path)? {
            LoadResult::Loaded(contents) => properties::parse(&contents),
            LoadResult::NotFound => {
                debug!(path = ?path, "config file does not exist");
                HashMap::new()
            }
        };

        Ok(Self {
            path,
            maps: Mutex::new(Maps {
                committed,
                pending: BTreeMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.maps.lock().committed.get(key).cloned()
    }

    /// Sets `key`, returning the previous value.
    pub fn set(&self, key: &str, value: &str) -> Option<String> {
        let mut maps = self.maps.lock();
        maps.pending.insert(key.to_string(), Some(value.to_string()));
        maps.committed.insert(key.to_string(), value.to_string())
    }

    /// Removes `key`, returning the previous value.
    pub fn unset(&self, key: &str) -> Option<String> {
        let mut maps = self.maps.lock();
        maps.pending.insert(key.to_string(), None);
        maps.committed.remove(key)
    }

    /// Applies `changes` as if each had been set or unset here, keeping
    /// them pending for the next flush.
    pub fn record(&self, changes: &Changes) {
        let mut maps = self.maps.lock();
        changes.apply_to(&mut maps.committed);
        for (key, value) in changes.iter() {
            maps.pending.insert(key.clone(), value.clone());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.maps.lock().committed.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.maps.lock().committed.clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.maps.lock().pending.is_empty()
    }

    /// Drains the pending changes. Returns `None` when nothing is pending.
    ///
    /// Callers must follow up with [`patch`](Self::patch): the drained
    /// changes are no longer tracked by the store.
    pub fn swap_changes(&self) -> Option<Changes> {
        let mut maps = self.maps.lock();
        if maps.pending.is_empty() {
            return None;
        }
        Some(Changes(std::mem::take(&mut maps.pending)))
    }

    /// Merges `changes` into the file on disk.
    ///
    /// When the file is missing or empty, the whole committed view is
    /// written instead of just the delta, so a first save (or a file deleted
    /// behind our back) doesn't lose earlier values.
    pub fn patch(&self, changes: &Changes) -> Result<()> {
        let _lock = ScopedFileLock::acquire(ScopedFileLock::sidecar(&self.path))?;

        let mut on_disk = match atomic::read_if_exists(&self.path)? {
            LoadResult::Loaded(contents) => properties::parse(&contents),
            LoadResult::NotFound => {
                debug!(path = ?self.path, "config file does not exist");
                HashMap::new()
            }
        };

        if on_disk.is_empty() {
            on_disk = self.snapshot();
        }
        changes.apply_to(&mut on_disk);

        atomic::write_atomic(&self.path, &properties::store(&on_disk))?;
        debug!(path = ?self.path, changes = changes.len(), "patched config file");
        Ok(())
    }

    /// Overwrites the file on disk with `values`, e.g. a remote snapshot.
    pub fn replace_on_disk(path: &Path, values: &HashMap<String, String>) -> Result<()> {
        let _lock = ScopedFileLock::acquire(ScopedFileLock::sidecar(path))?;
        atomic::write_atomic(path, &properties::store(values))
    }
}
