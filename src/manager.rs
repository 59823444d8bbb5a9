//! The config manager: profile selection, typed access and synchronization.
//!
//! A [`ConfigManager`] is created once per process and shared as an
//! `Arc<ConfigManager>`. Until [`load`](ConfigManager::load) succeeds it is
//! unloaded: reads return `None` and writes fail with
//! [`Error::NotLoaded`]. Once loaded it holds two open stores:
//!
//! - the active user profile, for keys without a sub-profile;
//! - the internal `$rsprofile` profile, for keys scoped to an account
//!   profile (`group.rsprofile.<id>.key`).
//!
//! Reads and writes only touch the in-memory stores. Durability happens in
//! [`send_config`](ConfigManager::send_config), called periodically by a
//! [`FlushScheduler`](crate::FlushScheduler) and on demand.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tracing::{debug, error, info, warn};

use crate::{
    config::{ConfigGroup, ConfigItem, registered_groups},
    error::{Error, Result},
    event::{ConfigChanged, ConfigEvent, EventSink},
    global::GroupCache,
    key::{self, RSPROFILE_GROUP, split_key, whole_key},
    migration,
    profile::{DEFAULT_PROFILE, Lock, Profile, ProfileRegistry, RSPROFILE_NAME, UNKNOWN_REV},
    remote::{AccountSession, RemoteConfigClient, RemoteProfile},
    rsprofile::{
        self, ACCOUNT_HASH, ACCOUNT_HASH_INVALID, AccountIdentity, DISPLAY_NAME, LOGIN_HASH,
        LOGIN_SALT, RsProfile, RsProfileType, SALT_LEN, TYPE,
    },
    settings::ManagerSettings,
    store::{Changes, PropertyStore},
    value::ConfigValue,
};

/// A profile with its store open.
#[derive(Debug, Clone)]
struct OpenProfile {
    id: i64,
    name: String,
    sync: bool,
    data: Arc<PropertyStore>,
}

impl OpenProfile {
    fn open(registry: &ProfileRegistry, profile: &Profile) -> Result<Self> {
        Ok(Self {
            id: profile.id,
            name: profile.name.clone(),
            sync: profile.sync,
            data: Arc::new(PropertyStore::open(registry.profile_config_file(profile))?),
        })
    }
}

#[derive(Debug)]
struct Loaded {
    profile: OpenProfile,
    rs_profile: OpenProfile,
}

pub struct ConfigManager {
    settings: ManagerSettings,
    registry: ProfileRegistry,
    client: Arc<dyn RemoteConfigClient>,
    events: Arc<dyn EventSink>,
    identity: Option<Arc<dyn AccountIdentity>>,
    session: RwLock<Option<AccountSession>>,
    state: RwLock<Option<Loaded>>,
    // None => a profile has to be found or created on first use
    rs_profile_key: RwLock<Option<String>>,
    rs_lookup: Mutex<()>,
    cache: GroupCache,
}

impl ConfigManager {
    pub fn new(
        settings: ManagerSettings,
        client: Arc<dyn RemoteConfigClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let registry = ProfileRegistry::new(settings.config_dir.clone());
        Self {
            settings,
            registry,
            client,
            events,
            identity: None,
            session: RwLock::new(None),
            state: RwLock::new(None),
            rs_profile_key: RwLock::new(None),
            rs_lookup: Mutex::new(()),
            cache: GroupCache::new(),
        }
    }

    /// Supplies the account identity used to pick account profiles.
    pub fn with_identity(mut self, identity: Arc<dyn AccountIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn active_profile_id(&self) -> Option<i64> {
        self.state.read().as_ref().map(|l| l.profile.id)
    }

    pub fn session(&self) -> Option<AccountSession> {
        self.session.read().clone()
    }

    /// Sets or clears the remote session. Takes effect on the next flush or
    /// load; nothing is reloaded here.
    pub fn switch_session(&self, session: Option<AccountSession>) {
        match &session {
            Some(s) => debug!(uuid = %s.uuid, "switched session"),
            None => debug!("cleared session"),
        }
        *self.session.write() = session;
    }

    // ---------------------------------------------------------------------
    // loading and profile selection
    // ---------------------------------------------------------------------

    /// Loads (or reloads) the active and account profiles.
    ///
    /// With a session, the remote profile list is merged into the registry
    /// and synced profiles are refreshed when their revision is stale. A
    /// remote failure downgrades to local-only.
    ///
    /// On a reload, pending changes are flushed first and every value that
    /// differs from what was loaded before is announced with a
    /// [`ConfigChanged`] event.
    pub fn load(&self) -> Result<()> {
        if self.is_loaded() {
            self.send_config();
        }

        let session = self.session();
        let remote = session
            .as_ref()
            .and_then(|session| self.fetch_remote_profiles(session));

        let (profile, rs_profile) = {
            let mut lock = self.registry.lock()?;

            let legacy = self.settings.legacy_config_path();
            if let Err(err) = migration::migrate_legacy(&mut lock, &self.registry, &legacy) {
                warn!(legacy = ?legacy, %err, "unable to migrate legacy configuration");
            }

            if let Some(remote) = &remote {
                merge_remote_profiles(&mut lock, remote);
            }

            let profile = self.select_profile(&mut lock)?;
            let rs_profile = ensure_rs_profile(&mut lock)?;
            lock.commit()?;
            (profile, rs_profile)
        };

        info!(name = %profile.name, "Using profile");

        if let (Some(session), Some(remote)) = (&session, &remote) {
            for p in [&profile, &rs_profile] {
                if p.sync {
                    self.reconcile(p, session, remote);
                }
            }
        }

        let loaded = Loaded {
            profile: OpenProfile::open(&self.registry, &profile)?,
            rs_profile: OpenProfile::open(&self.registry, &rs_profile)?,
        };
        let (new_profile, new_rs_profile) = (loaded.profile.clone(), loaded.rs_profile.clone());
        let previous = self.state.write().replace(loaded);
        self.cache.invalidate();

        if let Some(previous) = previous {
            for (old, new) in [
                (&previous.profile, &new_profile),
                (&previous.rs_profile, &new_rs_profile),
            ] {
                self.carry_over(old, new, session.as_ref());
                self.announce_differences(&old.data.snapshot(), &new.data.snapshot());
            }
        }

        self.events.post(ConfigEvent::ProfileChanged);
        Ok(())
    }

    fn select_profile(&self, lock: &mut Lock<'_>) -> Result<Profile> {
        let selected = match &self.settings.profile_name {
            Some(name) => match lock.find_profile_by_name(name) {
                Some(profile) => Some(profile.clone()),
                None => {
                    info!(name = %name, "creating requested profile");
                    Some(lock.create_profile(name)?)
                }
            },
            None => lock
                .profiles()
                .iter()
                .filter(|p| !p.is_internal())
                .find(|p| p.active)
                .or_else(|| lock.profiles().iter().find(|p| !p.is_internal()))
                .cloned(),
        };

        let profile = match selected {
            Some(profile) => profile,
            None => lock.create_profile(DEFAULT_PROFILE)?,
        };
        lock.set_active(profile.id);
        Ok(lock
            .find_profile(profile.id)
            .cloned()
            .unwrap_or(profile))
    }

    fn fetch_remote_profiles(&self, session: &AccountSession) -> Option<Vec<RemoteProfile>> {
        match self.client.list(session) {
            Ok(profiles) => Some(profiles),
            Err(err) => {
                warn!(%err, "unable to fetch remote profiles, continuing local-only");
                None
            }
        }
    }

    /// Brings a synced profile's data file in line with the remote copy.
    ///
    /// Fetches the remote snapshot when the local revision is unknown or
    /// differs. A profile the remote doesn't know yet is uploaded whole.
    fn reconcile(&self, profile: &Profile, session: &AccountSession, remote: &[RemoteProfile]) {
        let Some(remote_profile) = remote.iter().find(|r| r.id == profile.id) else {
            if let Err(err) = self.upload_profile(profile, session) {
                warn!(name = %profile.name, %err, "unable to upload profile");
            }
            return;
        };

        if profile.rev != UNKNOWN_REV && profile.rev == remote_profile.rev {
            info!(name = %profile.name, rev = profile.rev, "Profile up to date");
            return;
        }

        info!(
            name = %profile.name,
            local = profile.rev,
            remote = remote_profile.rev,
            "Profile out of date, fetching"
        );

        let config = match self.client.get(session, profile.id) {
            Ok(config) => config,
            Err(err) => {
                warn!(name = %profile.name, %err, "unable to fetch remote profile");
                return;
            }
        };

        let path = self.registry.profile_config_file(profile);
        if let Err(err) = PropertyStore::replace_on_disk(&path, &config.values) {
            error!(path = ?path, %err, "unable to save remote profile");
            return;
        }

        let rev = config.rev;
        if let Err(err) = self.update_profile(profile.id, &profile.name, profile.sync, |p| {
            p.rev = rev
        }) {
            error!(%err, "unable to update profile revision");
        }
    }

    /// Sends the whole on-disk profile to the remote service.
    fn upload_profile(&self, profile: &Profile, session: &AccountSession) -> Result<()> {
        let path = self.registry.profile_config_file(profile);
        let values = PropertyStore::open(&path)?.snapshot();
        if values.is_empty() {
            return Ok(());
        }

        let mut changes = Changes::new();
        for (key, value) in values {
            changes.edit(key, value);
        }

        debug!(name = %profile.name, "uploading profile");
        let rev = self.client.patch(session, &changes.to_patch(), profile.id)?;
        self.update_profile(profile.id, &profile.name, true, |p| p.rev = rev)
    }

    /// Edits a registry profile in place, recreating it if it was removed
    /// behind our back so the open store stays valid.
    fn update_profile(
        &self,
        id: i64,
        name: &str,
        sync: bool,
        f: impl FnOnce(&mut Profile),
    ) -> Result<()> {
        let mut lock = self.registry.lock()?;
        if lock.find_profile(id).is_none() {
            warn!(id, name, "lost profile, recreating");
            let recreated = match lock.create_profile_with_id(name, id) {
                Ok(profile) => profile,
                Err(Error::ProfileExists(_)) => {
                    lock.create_profile_with_id(&format!("{name}-{id}"), id)?
                }
                Err(err) => return Err(err),
            };
            if let Some(p) = lock.find_profile_mut(recreated.id) {
                p.sync = sync;
            }
        }

        let profile = lock
            .find_profile_mut(id)
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
        f(profile);
        lock.dirty();
        lock.commit()
    }

    // ---------------------------------------------------------------------
    // reads
    // ---------------------------------------------------------------------

    fn store_for(&self, profile: Option<&str>) -> Option<Arc<PropertyStore>> {
        let state = self.state.read();
        let loaded = state.as_ref()?;
        Some(match profile {
            Some(_) => loaded.rs_profile.data.clone(),
            None => loaded.profile.data.clone(),
        })
    }

    pub fn get_configuration(&self, group: &str, key: &str) -> Option<String> {
        self.get_configuration_in(group, None, key)
    }

    pub fn get_configuration_in(
        &self,
        group: &str,
        profile: Option<&str>,
        key: &str,
    ) -> Option<String> {
        self.store_for(profile)?.get(&whole_key(group, profile, key))
    }

    /// Typed read. Empty and unparseable values read as `None`; the latter
    /// are logged.
    pub fn get<T: ConfigValue>(&self, group: &str, key: &str) -> Option<T> {
        self.get_in(group, None, key)
    }

    pub fn get_in<T: ConfigValue>(
        &self,
        group: &str,
        profile: Option<&str>,
        key: &str,
    ) -> Option<T> {
        let value = self.get_configuration_in(group, profile, key)?;
        if value.is_empty() {
            return None;
        }
        match T::from_config_str(&value) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %whole_key(group, profile, key), %err, "Unable to unmarshal");
                None
            }
        }
    }

    /// Reads a whole config group, cached until the next change.
    pub fn config<G: ConfigGroup>(&self) -> Arc<G> {
        self.cache.get_or_load(|| G::load(self))
    }

    pub fn get_configuration_keys(&self, prefix: &str) -> Vec<String> {
        let Some(store) = self.store_for(None) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        keys
    }

    /// Keys (without group and profile) under `group.profile.key_prefix`.
    pub fn get_rs_profile_configuration_keys(
        &self,
        group: &str,
        profile: &str,
        key_prefix: &str,
    ) -> Vec<String> {
        let Some(store) = self.store_for(Some(profile)) else {
            return Vec::new();
        };
        let prefix = whole_key(group, Some(profile), key_prefix);
        let mut keys: Vec<String> = store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .filter_map(|k| split_key(&k).map(|split| split.key))
            .collect();
        keys.sort();
        keys
    }

    // ---------------------------------------------------------------------
    // writes
    // ---------------------------------------------------------------------

    pub fn set_configuration(&self, group: &str, key: &str, value: &str) -> Result<()> {
        self.set_configuration_in(group, None, key, value)
    }

    pub fn set_configuration_in(
        &self,
        group: &str,
        profile: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<()> {
        if let Some(changed) = self.store_value(group, profile, key, value)? {
            self.events.post(ConfigEvent::ConfigChanged(changed));
        }
        Ok(())
    }

    /// Writes without notifying listeners. Returns the event to post, or
    /// `None` when the value didn't change.
    fn store_value(
        &self,
        group: &str,
        profile: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<Option<ConfigChanged>> {
        validate(group, key)?;
        let store = self.store_for(profile).ok_or(Error::NotLoaded)?;

        let wholekey = whole_key(group, profile, key);
        let old_value = store.set(&wholekey, value);
        if old_value.as_deref() == Some(value) {
            return Ok(None);
        }

        debug!(key = %wholekey, value, "Setting configuration value");
        self.cache.invalidate();
        Ok(Some(ConfigChanged {
            group: group.to_string(),
            profile: profile.map(str::to_string),
            key: key.to_string(),
            old_value,
            new_value: Some(value.to_string()),
        }))
    }

    pub fn set<T: ConfigValue>(&self, group: &str, key: &str, value: &T) -> Result<()> {
        self.set_configuration_in(group, None, key, &value.to_config_string())
    }

    pub fn set_in<T: ConfigValue>(
        &self,
        group: &str,
        profile: Option<&str>,
        key: &str,
        value: &T,
    ) -> Result<()> {
        self.set_configuration_in(group, profile, key, &value.to_config_string())
    }

    pub fn unset_configuration(&self, group: &str, key: &str) -> Result<()> {
        self.unset_configuration_in(group, None, key)
    }

    pub fn unset_configuration_in(
        &self,
        group: &str,
        profile: Option<&str>,
        key: &str,
    ) -> Result<()> {
        validate(group, key)?;
        let store = self.store_for(profile).ok_or(Error::NotLoaded)?;

        let wholekey = whole_key(group, profile, key);
        let Some(old_value) = store.unset(&wholekey) else {
            return Ok(());
        };

        debug!(key = %wholekey, "Unsetting configuration value");
        self.cache.invalidate();
        self.events.post(ConfigEvent::ConfigChanged(ConfigChanged {
            group: group.to_string(),
            profile: profile.map(str::to_string),
            key: key.to_string(),
            old_value: Some(old_value),
            new_value: None,
        }));
        Ok(())
    }

    /// Writes the declared defaults of `G` into the active profile.
    ///
    /// Existing values that parse as the item's type are kept unless
    /// `force` is set, in which case items with a default are reset to it
    /// and items without one are cleared.
    pub fn set_default_configuration<G: ConfigGroup>(&self, force: bool) -> Result<()> {
        self.apply_defaults(G::GROUP, G::items(), force)
    }

    /// [`set_default_configuration`](Self::set_default_configuration) for
    /// every group registered with the derive macro or
    /// [`submit_group!`](crate::submit_group).
    pub fn set_default_configuration_all(&self, force: bool) -> Result<()> {
        for registered in registered_groups() {
            self.apply_defaults((registered.group)(), (registered.items)(), force)?;
        }
        Ok(())
    }

    fn apply_defaults(&self, group: &str, items: Vec<ConfigItem>, force: bool) -> Result<()> {
        for item in items {
            let current = self.get_configuration(group, item.key);

            let Some(default) = item.default else {
                if force && current.is_some() {
                    self.unset_configuration(group, item.key)?;
                }
                continue;
            };

            if !force
                && current
                    .as_deref()
                    .is_some_and(|c| !c.is_empty() && (item.is_valid)(c))
            {
                continue;
            }

            // empty and unset are the same thing on the wire
            if current.as_deref().unwrap_or_default() == default {
                continue;
            }

            debug!(group, key = item.key, default = %default, "Setting default configuration value");
            self.set_configuration(group, item.key, &default)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // flushing
    // ---------------------------------------------------------------------

    /// Flushes pending changes of both open profiles.
    ///
    /// Synced profiles are patched remotely first when a session exists;
    /// the local durable merge runs regardless of the remote outcome.
    pub fn send_config(&self) {
        self.events.post(ConfigEvent::ConfigSync);

        let Some((profile, rs_profile)) = self
            .state
            .read()
            .as_ref()
            .map(|l| (l.profile.clone(), l.rs_profile.clone()))
        else {
            return;
        };

        let session = self.session();
        self.save_configuration(&profile, session.as_ref());
        self.save_configuration(&rs_profile, session.as_ref());
    }

    fn save_configuration(&self, profile: &OpenProfile, session: Option<&AccountSession>) {
        let Some(changes) = profile.data.swap_changes() else {
            return;
        };

        if let (true, Some(session)) = (profile.sync, session) {
            match self.client.patch(session, &changes.to_patch(), profile.id) {
                Ok(rev) => self.record_patch_revision(profile, rev),
                Err(err) => warn!(name = %profile.name, %err, "unable to patch remote profile"),
            }
        }

        if let Err(err) = profile.data.patch(&changes) {
            error!(path = ?profile.data.path(), %err, "unable to save configuration file");
        }
    }

    fn record_patch_revision(&self, profile: &OpenProfile, new_rev: i64) {
        let result = self.update_profile(profile.id, &profile.name, profile.sync, |p| {
            if p.rev != UNKNOWN_REV && new_rev.checked_sub(1) == Some(p.rev) {
                p.rev = new_rev;
            } else {
                debug!(
                    expected = p.rev,
                    got = new_rev,
                    "Patch did not apply to expected revision"
                );
                p.rev = UNKNOWN_REV;
            }
        });
        if let Err(err) = result {
            error!(%err, "unable to record profile revision");
        }
    }

    /// Final flush before the process exits.
    pub fn shutdown(&self) {
        self.send_config();
    }

    // ---------------------------------------------------------------------
    // profile switching and management
    // ---------------------------------------------------------------------

    /// Makes profile `id` the active profile.
    ///
    /// Pending changes are flushed first. Every key whose value differs
    /// between the old and the new profile is announced with a
    /// [`ConfigChanged`] event, followed by [`ConfigEvent::ProfileChanged`].
    pub fn switch_profile(&self, id: i64) -> Result<()> {
        if !self.is_loaded() {
            return Err(Error::NotLoaded);
        }

        self.send_config();

        let target = {
            let mut lock = self.registry.lock()?;
            let target = lock
                .find_profile(id)
                .cloned()
                .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
            if target.is_internal() {
                return Err(Error::ProfileNotFound(target.name));
            }
            lock.set_active(id);
            lock.commit()?;
            target
        };

        let session = self.session();
        if target.sync {
            if let Some(session) = &session {
                if let Some(remote) = self.fetch_remote_profiles(session) {
                    self.reconcile(&target, session, &remote);
                }
            }
        }

        info!(name = %target.name, "Switching profile");

        let new_profile = OpenProfile::open(&self.registry, &target)?;
        let opened = new_profile.clone();
        let old_profile = {
            let mut state = self.state.write();
            let loaded = state.as_mut().ok_or(Error::NotLoaded)?;
            self.cache.invalidate();
            std::mem::replace(&mut loaded.profile, new_profile)
        };

        // anything written to the old store after the flush above
        self.carry_over(&old_profile, &opened, session.as_ref());

        let old_values = old_profile.data.snapshot();
        let new_values = opened.data.snapshot();
        self.announce_differences(&old_values, &new_values);

        self.events.post(ConfigEvent::ProfileChanged);
        Ok(())
    }

    fn announce_differences(
        &self,
        old_values: &HashMap<String, String>,
        new_values: &HashMap<String, String>,
    ) {
        let mut all_keys: Vec<&String> = old_values
            .keys()
            .chain(new_values.keys())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        all_keys.sort();

        for wholekey in all_keys {
            let Some(split) = split_key(wholekey) else {
                continue;
            };
            let old_value = old_values.get(wholekey);
            let new_value = new_values.get(wholekey);
            if old_value == new_value {
                continue;
            }

            debug!(key = %wholekey, value = ?new_value, "Loading configuration value");
            self.events.post(ConfigEvent::ConfigChanged(ConfigChanged {
                group: split.group,
                profile: split.profile,
                key: split.key,
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
            }));
        }
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.registry.list_profiles()
    }

    pub fn create_profile(&self, name: &str) -> Result<Profile> {
        let mut lock = self.registry.lock()?;
        let profile = lock.create_profile(name)?;
        lock.commit()?;
        info!(name, id = profile.id, "created profile");
        Ok(profile)
    }

    /// Renames a profile locally and, if it is synced, remotely.
    pub fn rename_profile(&self, id: i64, new_name: &str) -> Result<()> {
        let is_open = self.open_profile(id).is_some();
        if is_open {
            self.send_config();
        }

        let renamed = {
            let mut lock = self.registry.lock()?;
            lock.rename_profile(id, new_name)?;
            let renamed = lock
                .find_profile(id)
                .cloned()
                .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
            lock.commit()?;
            renamed
        };

        if renamed.sync {
            if let Some(session) = self.session() {
                if let Err(err) = self.client.rename(&session, id, new_name) {
                    warn!(id, %err, "unable to rename remote profile");
                }
            }
        }

        if is_open {
            let reopened = OpenProfile::open(&self.registry, &renamed)?;
            if let Some(previous) = self.replace_open_profile(reopened.clone()) {
                // writes that landed after the flush above
                self.carry_over(&previous, &reopened, self.session().as_ref());
            }
        }
        Ok(())
    }

    /// Removes a profile from the registry, and from the remote service if
    /// it is synced. The data file stays on disk.
    pub fn delete_profile(&self, id: i64) -> Result<()> {
        if let Some(open) = self.open_profile(id) {
            return Err(Error::ActiveProfile(open.name));
        }

        let removed = {
            let mut lock = self.registry.lock()?;
            let removed = lock
                .remove_profile(id)
                .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
            lock.commit()?;
            removed
        };

        if removed.sync {
            if let Some(session) = self.session() {
                if let Err(err) = self.client.delete(&session, id) {
                    warn!(id, %err, "unable to delete remote profile");
                }
            }
        }
        info!(id, name = %removed.name, "deleted profile");
        Ok(())
    }

    /// Creates `new_name` as a copy of profile `from`.
    pub fn clone_profile(&self, from: i64, new_name: &str) -> Result<Profile> {
        if self.open_profile(from).is_some() {
            self.send_config();
        }

        let (source, target) = {
            let mut lock = self.registry.lock()?;
            let source = lock
                .find_profile(from)
                .cloned()
                .ok_or_else(|| Error::ProfileNotFound(from.to_string()))?;
            let target = lock.create_profile(new_name)?;
            lock.commit()?;
            (source, target)
        };

        self.registry.clone_profile(&source, &target)?;
        Ok(target)
    }

    /// Turns remote sync on or off for a profile.
    ///
    /// Enabling uploads the whole profile when a session exists; disabling
    /// deletes the remote copy and forgets the revision.
    ///
    /// The local flag changes even when the remote call fails; that failure
    /// is returned as [`Error::Remote`] and the next load reconciles.
    pub fn set_profile_sync(&self, id: i64, enabled: bool) -> Result<()> {
        if self.open_profile(id).is_some() {
            self.send_config();
        }

        let profile = {
            let mut lock = self.registry.lock()?;
            let profile = lock
                .find_profile_mut(id)
                .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
            if profile.sync == enabled {
                return Ok(());
            }
            profile.sync = enabled;
            profile.rev = UNKNOWN_REV;
            let profile = profile.clone();
            lock.dirty();
            lock.commit()?;
            profile
        };

        if let Some(mut open) = self.open_profile(id) {
            open.sync = enabled;
            self.replace_open_profile(open);
        }
        info!(id, enabled, "changed profile sync");

        let Some(session) = self.session() else {
            return Ok(());
        };
        if enabled {
            self.upload_profile(&profile, &session)
        } else {
            self.client.delete(&session, id)?;
            Ok(())
        }
    }

    fn open_profile(&self, id: i64) -> Option<OpenProfile> {
        let state = self.state.read();
        let loaded = state.as_ref()?;
        [&loaded.profile, &loaded.rs_profile]
            .into_iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Swaps in `open` for the open profile with the same id and returns
    /// the one it replaced.
    fn replace_open_profile(&self, open: OpenProfile) -> Option<OpenProfile> {
        let mut state = self.state.write();
        let loaded = state.as_mut()?;
        let slot = if loaded.profile.id == open.id {
            &mut loaded.profile
        } else if loaded.rs_profile.id == open.id {
            &mut loaded.rs_profile
        } else {
            return None;
        };
        let previous = std::mem::replace(slot, open);
        self.cache.invalidate();
        Some(previous)
    }

    /// Deals with changes still pending in a store that was just replaced.
    ///
    /// For the same profile they move into the replacement and go out with
    /// its next flush; otherwise they are flushed from the old store.
    fn carry_over(&self, old: &OpenProfile, new: &OpenProfile, session: Option<&AccountSession>) {
        if Arc::ptr_eq(&old.data, &new.data) {
            return;
        }
        if old.id != new.id {
            self.save_configuration(old, session);
            return;
        }
        if let Some(changes) = old.data.swap_changes() {
            debug!(name = %new.name, changes = changes.len(), "carrying pending changes over");
            new.data.record(&changes);
        }
    }

    // ---------------------------------------------------------------------
    // account profiles
    // ---------------------------------------------------------------------

    pub fn rs_profile_key(&self) -> Option<String> {
        self.rs_profile_key.read().clone()
    }

    /// Every account profile recorded in the `$rsprofile` store.
    pub fn rs_profiles(&self) -> Vec<RsProfile> {
        let Some(store) = self.store_for(Some(RSPROFILE_GROUP)) else {
            return Vec::new();
        };

        let prefix = format!("{RSPROFILE_GROUP}.{RSPROFILE_GROUP}.");
        let mut keys: Vec<String> = store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .filter_map(|k| split_key(&k).and_then(|split| split.profile))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        keys.sort();

        keys.into_iter()
            .map(|key| {
                let profile = Some(key.as_str());
                RsProfile {
                    display_name: self.get_configuration_in(RSPROFILE_GROUP, profile, DISPLAY_NAME),
                    profile_type: self
                        .get_in::<RsProfileType>(RSPROFILE_GROUP, profile, TYPE)
                        .unwrap_or_default(),
                    login_hash: self.get_in::<Vec<u8>>(RSPROFILE_GROUP, profile, LOGIN_HASH),
                    account_hash: self
                        .get_in::<i64>(RSPROFILE_GROUP, profile, ACCOUNT_HASH)
                        .unwrap_or(ACCOUNT_HASH_INVALID),
                    key,
                }
            })
            .collect()
    }

    /// Re-resolves the account profile for the current identity without
    /// creating one. Call when the identity changes.
    pub fn update_rs_profile(&self) -> Result<()> {
        let Some(identity) = self.identity.clone() else {
            return Ok(());
        };

        let lookup = self.find_rs_profile(identity.as_ref(), None, false)?;
        let key = lookup.found.map(|p| p.key);

        let changed = {
            let mut current = self.rs_profile_key.write();
            let changed = *current != key;
            *current = key.clone();
            changed
        };

        self.post_changes(lookup.changes);
        if changed {
            debug!(key = ?key, "RS profile changed");
            self.events.post(ConfigEvent::RsProfileChanged);
        }
        Ok(())
    }

    pub fn get_rs_profile_configuration(&self, group: &str, key: &str) -> Option<String> {
        let profile = self.rs_profile_key()?;
        self.get_configuration_in(group, Some(&profile), key)
    }

    pub fn get_rs_profile<T: ConfigValue>(&self, group: &str, key: &str) -> Option<T> {
        let profile = self.rs_profile_key()?;
        self.get_in(group, Some(&profile), key)
    }

    /// Writes `key` for the current account, creating its account profile
    /// first if needed. Without a logged in identity this is a logged no-op.
    ///
    /// Listeners may call back into the manager, including this method, from
    /// the events it posts.
    pub fn set_rs_profile_configuration<T: ConfigValue>(
        &self,
        group: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let profile_key = match self.rs_profile_key() {
            Some(profile_key) => profile_key,
            None => {
                let Some(identity) = self.identity.clone() else {
                    warn!("trying to use profile without an account identity");
                    return Ok(());
                };

                let display_name = identity.display_name();
                if display_name.is_none() {
                    warn!("trying to create profile without display name");
                }

                let lookup = self.find_rs_profile(identity.as_ref(), display_name, true)?;
                let Some(found) = lookup.found else {
                    self.post_changes(lookup.changes);
                    warn!("trying to create a profile while not logged in");
                    return Ok(());
                };

                // published before any event so listeners see the new profile
                *self.rs_profile_key.write() = Some(found.key.clone());
                self.post_changes(lookup.changes);
                debug!(key = %found.key, "RS profile changed");
                self.events.post(ConfigEvent::RsProfileChanged);
                found.key
            }
        };

        self.set_in(group, Some(&profile_key), key, value)
    }

    pub fn unset_rs_profile_configuration(&self, group: &str, key: &str) -> Result<()> {
        let Some(profile) = self.rs_profile_key() else {
            return Ok(());
        };
        self.unset_configuration_in(group, Some(&profile), key)
    }

    fn post_changes(&self, changes: Vec<ConfigChanged>) {
        for changed in changes {
            self.events.post(ConfigEvent::ConfigChanged(changed));
        }
    }

    fn stage<T: ConfigValue>(
        &self,
        changes: &mut Vec<ConfigChanged>,
        profile: Option<&str>,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let value = value.to_config_string();
        changes.extend(self.store_value(RSPROFILE_GROUP, profile, key, &value)?);
        Ok(())
    }

    /// Finds, and with `create` makes, the account profile of `identity`.
    ///
    /// Runs under `rs_lookup` so concurrent callers agree on one salt and
    /// one profile. Nothing is posted while the lock is held; the stored
    /// changes come back in `RsLookup::changes`.
    fn find_rs_profile(
        &self,
        identity: &dyn AccountIdentity,
        display_name: Option<String>,
        create: bool,
    ) -> Result<RsLookup> {
        let _guard = self.rs_lookup.lock();
        let mut changes = Vec::new();

        let username = identity.username();
        let account_hash = identity.account_hash();
        let profile_type = identity.profile_type();

        if account_hash == ACCOUNT_HASH_INVALID && username.is_none() {
            return Ok(RsLookup::none(changes));
        }

        let login_hash = match &username {
            Some(username) => {
                let salt = match self.get::<Vec<u8>>(RSPROFILE_GROUP, LOGIN_SALT) {
                    Some(salt) => salt,
                    None => {
                        let mut salt = vec![0u8; SALT_LEN];
                        rand::rng().fill_bytes(&mut salt);
                        info!("creating new login salt as there is no existing one");
                        self.stage(&mut changes, None, LOGIN_SALT, &salt)?;
                        salt
                    }
                };
                Some(rsprofile::login_hash(&salt, username))
            }
            None => None,
        };

        let profiles = self.rs_profiles();
        let matches =
            rsprofile::find_matches(&profiles, profile_type, account_hash, login_hash.as_deref());
        if matches.len() > 1 {
            warn!(count = matches.len(), "multiple matching profiles");
        }

        if let Some(found) = matches.first() {
            if found.account_hash == ACCOUNT_HASH_INVALID && account_hash != ACCOUNT_HASH_INVALID {
                let mut upgrades = 0;
                for p in profiles.iter().filter(|p| {
                    p.account_hash == ACCOUNT_HASH_INVALID
                        && p.login_hash.is_some()
                        && p.login_hash == login_hash
                }) {
                    self.stage(&mut changes, Some(&p.key), ACCOUNT_HASH, &account_hash)?;
                    upgrades += 1;
                }
                info!(upgrades, "Attaching account id to profiles");
            }
            return Ok(RsLookup {
                found: Some((*found).clone()),
                changes,
            });
        }

        if !create {
            return Ok(RsLookup::none(changes));
        }

        let taken: HashSet<String> = profiles.iter().map(|p| p.key.clone()).collect();
        let key = rsprofile::derive_key(account_hash, login_hash.as_deref(), profile_type, &taken)?;

        info!(
            key = %key,
            account_hash,
            profile_type = ?profile_type,
            "creating new rs profile"
        );

        let profile = Some(key.as_str());
        if let Some(login_hash) = &login_hash {
            self.stage(&mut changes, profile, LOGIN_HASH, login_hash)?;
        }
        if account_hash != ACCOUNT_HASH_INVALID {
            self.stage(&mut changes, profile, ACCOUNT_HASH, &account_hash)?;
        }
        self.stage(&mut changes, profile, TYPE, &profile_type)?;
        if let Some(display_name) = &display_name {
            self.stage(&mut changes, profile, DISPLAY_NAME, display_name)?;
        }

        Ok(RsLookup {
            found: Some(RsProfile {
                display_name,
                profile_type,
                login_hash,
                account_hash,
                key,
            }),
            changes,
        })
    }
}

/// Outcome of an account profile lookup, with the writes it made.
struct RsLookup {
    found: Option<RsProfile>,
    changes: Vec<ConfigChanged>,
}

impl RsLookup {
    fn none(changes: Vec<ConfigChanged>) -> Self {
        Self {
            found: None,
            changes,
        }
    }
}

fn validate(group: &str, key: &str) -> Result<()> {
    if key::is_valid(group, key) {
        Ok(())
    } else {
        Err(Error::InvalidKey {
            group: group.to_string(),
            key: key.to_string(),
        })
    }
}

/// Folds the remote profile list into the registry.
///
/// Unknown remote profiles get a local shadow with `sync` set and an
/// unknown revision; known ones take the remote name. A local internal
/// profile that the remote knows under another id adopts the remote id.
fn merge_remote_profiles(lock: &mut Lock<'_>, remote: &[RemoteProfile]) {
    for remote_profile in remote {
        let id = remote_profile.id;
        let name = remote_profile.name.as_str();

        if lock.find_profile(id).is_some() {
            if let Some(local) = lock.find_profile(id).filter(|p| p.name != name) {
                let local_name = local.name.clone();
                if let Err(err) = lock.rename_profile(id, name) {
                    warn!(id, from = %local_name, to = name, %err, "unable to take remote name");
                }
            }
            if let Some(local) = lock.find_profile_mut(id) {
                if !local.sync {
                    local.sync = true;
                    lock.dirty();
                }
            }
            continue;
        }

        let same_name = lock.find_profile_by_name(name).map(|p| (p.id, p.is_internal()));
        match same_name {
            Some((local_id, true)) => {
                info!(name, local_id, remote_id = id, "adopting remote id for internal profile");
                if let Some(local) = lock.find_profile_mut(local_id) {
                    local.id = id;
                    local.sync = true;
                    local.rev = UNKNOWN_REV;
                }
                lock.dirty();
            }
            Some((_, false)) => {
                let shadow_name = format!("{name}-{id}");
                debug!(id, name = %shadow_name, "remote profile name taken locally");
                add_shadow(lock, &shadow_name, id);
            }
            None => add_shadow(lock, name, id),
        }
    }
}

fn add_shadow(lock: &mut Lock<'_>, name: &str, id: i64) {
    match lock.create_profile_with_id(name, id) {
        Ok(_) => {
            if let Some(p) = lock.find_profile_mut(id) {
                p.sync = true;
            }
            debug!(id, name, "added remote profile");
        }
        Err(err) => warn!(id, name, %err, "unable to add remote profile"),
    }
}

fn ensure_rs_profile(lock: &mut Lock<'_>) -> Result<Profile> {
    let id = match lock.find_profile_by_name(RSPROFILE_NAME) {
        Some(profile) => profile.id,
        None => lock.create_profile(RSPROFILE_NAME)?.id,
    };
    let profile = lock
        .find_profile_mut(id)
        .ok_or_else(|| Error::ProfileNotFound(RSPROFILE_NAME.to_string()))?;
    let changed = !profile.sync;
    profile.sync = true;
    let profile = profile.clone();
    if changed {
        lock.dirty();
    }
    Ok(profile)
}
