#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use profile_config::{
    AccountSession, ConfigEvent, ConfigManager, ConfigPatch, ManagerSettings, Profile,
    ProfileRegistry, RemoteConfig, RemoteConfigClient, RemoteError, RemoteProfile,
};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredProfile {
    pub name: String,
    pub rev: i64,
    pub values: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub profiles: HashMap<i64, StoredProfile>,
    /// Revision returned by the next patch instead of `rev + 1`.
    pub next_patch_rev: Option<i64>,
    pub list_calls: usize,
    pub get_calls: usize,
    pub patches: Vec<(i64, ConfigPatch)>,
    pub deleted: Vec<i64>,
    pub renamed: Vec<(i64, String)>,
}

/// In-memory remote service.
#[derive(Debug, Default, Clone)]
pub struct FakeRemote {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn with_profile(self, id: i64, name: &str, rev: i64, values: &[(&str, &str)]) -> Self {
        self.state.lock().unwrap().profiles.insert(
            id,
            StoredProfile {
                name: name.to_string(),
                rev,
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        );
        self
    }

    pub fn calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.list_calls + state.get_calls + state.patches.len()
    }
}

impl RemoteConfigClient for FakeRemote {
    fn list(&self, _session: &AccountSession) -> Result<Vec<RemoteProfile>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state
            .profiles
            .iter()
            .map(|(id, p)| RemoteProfile {
                id: *id,
                name: p.name.clone(),
                rev: p.rev,
            })
            .collect())
    }

    fn get(&self, _session: &AccountSession, id: i64) -> Result<RemoteConfig, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        let profile = state.profiles.get(&id).ok_or(RemoteError::NotFound(id))?;
        Ok(RemoteConfig {
            values: profile.values.clone(),
            rev: profile.rev,
        })
    }

    fn patch(
        &self,
        _session: &AccountSession,
        patch: &ConfigPatch,
        id: i64,
    ) -> Result<i64, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.patches.push((id, patch.clone()));
        let forced = state.next_patch_rev.take();

        let profile = state.profiles.entry(id).or_insert_with(|| StoredProfile {
            name: id.to_string(),
            rev: 0,
            values: HashMap::new(),
        });
        for (key, value) in &patch.edit {
            profile.values.insert(key.clone(), value.clone());
        }
        for key in &patch.unset {
            profile.values.remove(key);
        }
        profile.rev = forced.unwrap_or(profile.rev + 1);
        Ok(profile.rev)
    }

    fn delete(&self, _session: &AccountSession, id: i64) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(id);
        state.profiles.remove(&id);
        Ok(())
    }

    fn rename(&self, _session: &AccountSession, id: i64, name: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.renamed.push((id, name.to_string()));
        if let Some(profile) = state.profiles.get_mut(&id) {
            profile.name = name.to_string();
        }
        Ok(())
    }
}

pub type Events = Arc<Mutex<Vec<ConfigEvent>>>;

pub struct Harness {
    pub dir: TempDir,
    pub remote: FakeRemote,
    pub events: Events,
    pub manager: ConfigManager,
}

impl Harness {
    pub fn registry(&self) -> ProfileRegistry {
        self.manager.registry().clone()
    }

    pub fn take_events(&self) -> Vec<ConfigEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn profile(&self, id: i64) -> Profile {
        self.manager
            .list_profiles()
            .expect("Failed to list profiles")
            .into_iter()
            .find(|p| p.id == id)
            .expect("profile exists")
    }
}

pub fn settings(root: &Path) -> ManagerSettings {
    ManagerSettings::builder()
        .config_dir(root.join("profiles2"))
        .build()
        .expect("Failed to build settings")
}

pub fn harness(remote: FakeRemote) -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    harness_in(dir, remote)
}

pub fn harness_in(dir: TempDir, remote: FakeRemote) -> Harness {
    let events: Events = Arc::default();
    let sink = {
        let events = events.clone();
        move |event: ConfigEvent| events.lock().unwrap().push(event)
    };
    let manager = ConfigManager::new(settings(dir.path()), Arc::new(remote.clone()), Arc::new(sink));
    Harness {
        dir,
        remote,
        events,
        manager,
    }
}

pub fn session() -> AccountSession {
    AccountSession::new(Uuid::new_v4(), Some("zezima".to_string()))
}

/// Writes a registry with the given profiles before any manager touches it.
pub fn seed_registry(root: &Path, profiles: &[Profile], files: &[(&str, &str)]) {
    let registry = ProfileRegistry::new(root.join("profiles2"));
    let mut lock = registry.lock().expect("Failed to lock registry");
    for profile in profiles {
        lock.create_profile_with_id(&profile.name, profile.id)
            .expect("Failed to create profile");
        let stored = lock.find_profile_mut(profile.id).expect("profile");
        *stored = profile.clone();
    }
    lock.dirty();
    lock.commit().expect("Failed to commit registry");

    for (name, contents) in files {
        std::fs::write(registry.dir().join(format!("{name}.properties")), contents)
            .expect("Failed to write profile file");
    }
}
