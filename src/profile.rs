//! The on-disk list of profiles.
//!
//! All registry edits happen inside a [`Lock`], which holds the exclusive
//! advisory lock on `profiles.json.lck` for its whole lifetime. Another
//! locker, in this process or another one, never sees a partial update.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    atomic::{self, LoadResult, ScopedFileLock},
    error::{Error, Result},
};

pub const PROFILES_FILE: &str = "profiles.json";
pub const INTERNAL_PREFIX: char = '$';
pub const DEFAULT_PROFILE: &str = "default";
pub const RSPROFILE_NAME: &str = "$rsprofile";
pub const UNKNOWN_REV: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "unknown_rev")]
    pub rev: i64,
}

fn unknown_rev() -> i64 {
    UNKNOWN_REV
}

impl Profile {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sync: false,
            active: false,
            rev: UNKNOWN_REV,
        }
    }

    /// Internal profiles are not shown to users.
    pub fn is_internal(&self) -> bool {
        self.name.starts_with(INTERNAL_PREFIX)
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    dir: PathBuf,
}

impl ProfileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry_file(&self) -> PathBuf {
        self.dir.join(PROFILES_FILE)
    }

    pub fn profile_config_file(&self, profile: &Profile) -> PathBuf {
        self.data_file(&profile.name)
    }

    fn data_file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.properties"))
    }

    /// Blocks until the registry lock is held, then loads the profile list.
    pub fn lock(&self) -> Result<Lock<'_>> {
        fs::create_dir_all(&self.dir)?;
        let guard = ScopedFileLock::acquire(ScopedFileLock::sidecar(&self.registry_file()))?;

        let profiles = match atomic::read_if_exists(&self.registry_file())? {
            LoadResult::Loaded(contents) if contents.trim().is_empty() => Vec::new(),
            LoadResult::Loaded(contents) => serde_json::from_str(&contents)?,
            LoadResult::NotFound => Vec::new(),
        };

        Ok(Lock {
            registry: self,
            profiles,
            modified: false,
            _guard: guard,
        })
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self.lock()?.profiles().to_vec())
    }

    /// Replaces `to`'s data with a copy of `from`'s.
    ///
    /// The previous contents of `to` are kept next to it with a timestamp
    /// suffix. Neither profile may have an open store with pending changes.
    pub fn clone_profile(&self, from: &Profile, to: &Profile) -> Result<()> {
        let from_file = self.profile_config_file(from);
        let to_file = self.profile_config_file(to);

        debug!(from = %from.name, to = %to.name, "cloning profile");

        if to_file.exists() {
            let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
            let mut backup = to_file.clone().into_os_string();
            backup.push(format!(".{stamp}"));
            fs::copy(&to_file, &backup)?;
        }

        match fs::copy(&from_file, &to_file) {
            Ok(_) => Ok(()),
            // nothing was ever saved for the source, so the copy is empty too
            Err(err) if err.kind() == ErrorKind::NotFound => {
                atomic::write_atomic(&to_file, "")
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// An open registry transaction.
///
/// Mutations only touch the in-memory list. If anything was marked modified
/// the list is written back when the lock is dropped, before the lock file
/// is released. Use [`commit`](Lock::commit) to observe write errors.
pub struct Lock<'a> {
    registry: &'a ProfileRegistry,
    profiles: Vec<Profile>,
    modified: bool,
    _guard: ScopedFileLock,
}

impl Lock<'_> {
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn find_profile(&self, id: i64) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn find_profile_mut(&mut self, id: i64) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id == id)
    }

    pub fn find_profile_by_name(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Creates a profile with a fresh id.
    ///
    /// Fails if a profile with the same name already exists; the check and
    /// the insert happen under the same lock.
    pub fn create_profile(&mut self, name: &str) -> Result<Profile> {
        let mut id = new_id();
        while self.find_profile(id).is_some() {
            id += 1;
        }
        self.create_profile_with_id(name, id)
    }

    pub fn create_profile_with_id(&mut self, name: &str, id: i64) -> Result<Profile> {
        if self.find_profile_by_name(name).is_some() {
            return Err(Error::ProfileExists(name.to_string()));
        }
        if self.find_profile(id).is_some() {
            return Err(Error::ProfileExists(id.to_string()));
        }

        let profile = Profile::new(id, name);
        self.profiles.push(profile.clone());
        self.dirty();
        debug!(id, name, "created profile");
        Ok(profile)
    }

    /// Removes the profile from the list. Its data file is left on disk as a
    /// backup.
    pub fn remove_profile(&mut self, id: i64) -> Option<Profile> {
        let index = self.profiles.iter().position(|p| p.id == id)?;
        let removed = self.profiles.remove(index);
        self.dirty();
        debug!(id, name = %removed.name, "removed profile");
        Some(removed)
    }

    /// Renames the profile and its data file.
    pub fn rename_profile(&mut self, id: i64, new_name: &str) -> Result<()> {
        if self.find_profile_by_name(new_name).is_some_and(|p| p.id != id) {
            return Err(Error::ProfileExists(new_name.to_string()));
        }

        let registry = self.registry;
        let profile = self
            .find_profile_mut(id)
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
        if profile.name == new_name {
            return Ok(());
        }

        let old_file = registry.data_file(&profile.name);
        let new_file = registry.data_file(new_name);
        match fs::rename(&old_file, &new_file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        info!(id, from = %profile.name, to = new_name, "renamed profile");
        profile.name = new_name.to_string();
        self.dirty();
        Ok(())
    }

    /// Makes `id` the only active user profile.
    pub fn set_active(&mut self, id: i64) {
        let mut changed = false;
        for profile in self.profiles.iter_mut().filter(|p| !p.is_internal()) {
            let active = profile.id == id;
            if profile.active != active {
                profile.active = active;
                changed = true;
            }
        }
        if changed {
            self.dirty();
        }
    }

    /// Marks the list modified after editing a profile in place.
    pub fn dirty(&mut self) {
        self.modified = true;
    }

    /// Writes the list now if it was modified.
    pub fn commit(mut self) -> Result<()> {
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(&self.profiles)?;
        atomic::write_atomic(&self.registry.registry_file(), &json)?;
        self.modified = false;
        Ok(())
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.save() {
            error!(%err, "unable to write profiles");
        }
    }
}

fn new_id() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros())
}
