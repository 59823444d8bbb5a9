mod common;

use std::{fs, sync::Arc, time::Duration};

use common::{FakeRemote, harness, harness_in, seed_registry, session};
use profile_config::{
    ConfigChanged, ConfigEvent, ConfigManager, Error, NoopSink, OfflineClient, Profile,
    profile::RSPROFILE_NAME,
};

fn synced(id: i64, name: &str, rev: i64, active: bool) -> Profile {
    Profile {
        id,
        name: name.to_string(),
        sync: true,
        active,
        rev,
    }
}

fn changes(events: &[ConfigEvent]) -> Vec<ConfigChanged> {
    events
        .iter()
        .filter_map(|e| match e {
            ConfigEvent::ConfigChanged(changed) => Some(changed.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_unloaded_manager_rejects_writes() {
    let h = harness(FakeRemote::default());

    assert!(!h.manager.is_loaded());
    assert_eq!(h.manager.get_configuration("group", "key"), None);
    assert!(matches!(
        h.manager.set_configuration("group", "key", "1"),
        Err(Error::NotLoaded)
    ));
    assert!(matches!(h.manager.switch_profile(1), Err(Error::NotLoaded)));
}

#[test]
fn test_first_load_creates_default_and_internal_profiles() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");

    let profiles = h.manager.list_profiles().expect("Failed to list");
    let default = profiles.iter().find(|p| p.name == "default").expect("default");
    let rs = profiles.iter().find(|p| p.name == RSPROFILE_NAME).expect("$rsprofile");

    assert!(default.active);
    assert!(!default.sync);
    assert!(rs.sync);
    assert_eq!(h.manager.active_profile_id(), Some(default.id));
    assert!(h.take_events().contains(&ConfigEvent::ProfileChanged));
}

#[test]
fn test_invalid_keys_are_rejected() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");

    for (group, key) in [("group", "a:b"), ("", "key"), ("group", "")] {
        let err = h.manager.set_configuration(group, key, "1").unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }), "{group:?}.{key:?}");
    }
    assert!(h.manager.get_configuration_keys("").is_empty());
}

#[test]
fn test_offline_flush_writes_locally_only() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");

    h.manager
        .set_configuration("group", "key", "5")
        .expect("Failed to set");
    assert_eq!(h.manager.get::<i32>("group", "key"), Some(5));

    h.manager.send_config();

    let contents = fs::read_to_string(h.dir.path().join("profiles2/default.properties"))
        .expect("Failed to read profile file");
    assert!(contents.contains("group.key=5"));
    assert_eq!(h.remote.calls(), 0);

    let id = h.manager.active_profile_id().expect("loaded");
    assert_eq!(h.profile(id).rev, -1);
}

#[test]
fn test_set_and_unset_emit_events_only_on_change() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");
    h.take_events();

    h.manager.set_configuration("group", "key", "a").expect("Failed to set");
    h.manager.set_configuration("group", "key", "a").expect("Failed to set");
    h.manager.unset_configuration("group", "key").expect("Failed to unset");
    h.manager.unset_configuration("group", "key").expect("Failed to unset");

    let events = changes(&h.take_events());
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].old_value, None);
    assert_eq!(events[0].new_value.as_deref(), Some("a"));
    assert_eq!(events[1].old_value.as_deref(), Some("a"));
    assert_eq!(events[1].new_value, None);
    assert_eq!(h.manager.get_configuration("group", "key"), None);
}

#[test]
fn test_unparseable_value_reads_as_none() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");

    h.manager
        .set_configuration("group", "count", "many")
        .expect("Failed to set");
    assert_eq!(h.manager.get::<i32>("group", "count"), None);
    assert_eq!(h.manager.get::<String>("group", "count").as_deref(), Some("many"));

    h.manager.set_configuration("group", "empty", "").expect("Failed to set");
    assert_eq!(h.manager.get::<String>("group", "empty"), None);
}

#[test]
fn test_up_to_date_profile_is_not_fetched() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(
        dir.path(),
        &[synced(1, "default", 10, true)],
        &[("default", "a.b=1\n")],
    );

    let remote = FakeRemote::default().with_profile(1, "default", 10, &[("a.b", "2")]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    assert_eq!(h.remote.state.lock().unwrap().get_calls, 0);
    assert_eq!(h.manager.get_configuration("a", "b").as_deref(), Some("1"));
}

#[test]
fn test_stale_profile_is_replaced_by_remote() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(
        dir.path(),
        &[synced(1, "default", 9, true)],
        &[("default", "a.b=1\na.old=x\n")],
    );

    let remote = FakeRemote::default().with_profile(1, "default", 10, &[("a.b", "2")]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    assert_eq!(h.remote.state.lock().unwrap().get_calls, 1);
    assert_eq!(h.manager.get_configuration("a", "b").as_deref(), Some("2"));
    assert_eq!(h.manager.get_configuration("a", "old"), None);
    assert_eq!(h.profile(1).rev, 10);
}

#[test]
fn test_patch_revision_advances_or_resets() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(dir.path(), &[synced(1, "default", 10, true)], &[]);

    let remote = FakeRemote::default().with_profile(1, "default", 10, &[]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.manager.send_config();
    assert_eq!(h.profile(1).rev, 11);

    // someone else patched in between
    h.remote.state.lock().unwrap().next_patch_rev = Some(15);
    h.manager.set_configuration("a", "b", "2").expect("Failed to set");
    h.manager.send_config();
    assert_eq!(h.profile(1).rev, -1);

    let state = h.remote.state.lock().unwrap();
    let (id, patch) = state.patches.last().expect("patched");
    assert_eq!(*id, 1);
    assert_eq!(patch.edit.get("a.b").map(String::as_str), Some("2"));
}

#[test]
fn test_unknown_revision_is_not_advanced_by_patch() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(dir.path(), &[synced(1, "default", 5, true)], &[]);

    let remote = FakeRemote::default().with_profile(1, "default", 5, &[]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    {
        let registry = h.registry();
        let mut lock = registry.lock().expect("Failed to lock");
        lock.find_profile_mut(1).expect("profile 1").rev = -1;
        lock.dirty();
        lock.commit().expect("Failed to commit");
    }

    // 0 would follow -1 if the unknown marker were taken as a revision
    h.remote.state.lock().unwrap().next_patch_rev = Some(0);
    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.manager.send_config();

    assert_eq!(h.remote.state.lock().unwrap().patches.len(), 1);
    assert_eq!(h.profile(1).rev, -1);
}

#[test]
fn test_unset_is_sent_as_remote_unset() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(
        dir.path(),
        &[synced(1, "default", 3, true)],
        &[("default", "a.b=1\n")],
    );

    let remote = FakeRemote::default().with_profile(1, "default", 3, &[("a.b", "1")]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    h.manager.unset_configuration("a", "b").expect("Failed to unset");
    h.manager.send_config();

    let state = h.remote.state.lock().unwrap();
    let (_, patch) = state.patches.last().expect("patched");
    assert!(patch.unset.contains("a.b"));
    assert!(patch.edit.is_empty());
    assert!(state.profiles[&1].values.is_empty());
}

#[test]
fn test_lost_profile_is_recreated_on_flush() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(dir.path(), &[synced(7, "main", 10, true)], &[]);

    let remote = FakeRemote::default().with_profile(7, "main", 10, &[]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    {
        let registry = h.registry();
        let mut lock = registry.lock().expect("Failed to lock");
        lock.remove_profile(7).expect("profile 7");
        lock.commit().expect("Failed to commit");
    }

    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.manager.send_config();

    let recreated = h.profile(7);
    assert_eq!(recreated.name, "main");
    assert!(recreated.sync);
    // recreated with an unknown revision, so 11 doesn't follow it
    assert_eq!(recreated.rev, -1);
}

#[test]
fn test_remote_profiles_are_merged_into_registry() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    seed_registry(
        dir.path(),
        &[Profile {
            id: 1,
            name: "default".into(),
            sync: false,
            active: true,
            rev: -1,
        }],
        &[],
    );

    let remote = FakeRemote::default()
        .with_profile(20, "pvm", 4, &[("a.b", "1")])
        .with_profile(21, "default", 2, &[]);
    let h = harness_in(dir, remote);
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");

    let profiles = h.manager.list_profiles().expect("Failed to list");
    let pvm = profiles.iter().find(|p| p.id == 20).expect("pvm shadow");
    assert_eq!(pvm.name, "pvm");
    assert!(pvm.sync);
    assert_eq!(pvm.rev, -1);

    let clash = profiles.iter().find(|p| p.id == 21).expect("renamed shadow");
    assert_eq!(clash.name, "default-21");
    assert_eq!(h.manager.active_profile_id(), Some(1));
}

#[test]
fn test_remote_failure_falls_back_to_local() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let manager = ConfigManager::new(
        common::settings(dir.path()),
        Arc::new(OfflineClient),
        Arc::new(NoopSink),
    );
    manager.switch_session(Some(session()));
    manager.load().expect("Failed to load");

    manager.set_configuration("a", "b", "1").expect("Failed to set");
    manager.send_config();

    let contents = fs::read_to_string(dir.path().join("profiles2/default.properties"))
        .expect("Failed to read profile file");
    assert!(contents.contains("a.b=1"));
}

#[test]
fn test_switch_profile_announces_differences() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");
    h.manager.set_configuration("a", "x", "1").expect("Failed to set");
    h.manager.set_configuration("a", "y", "2").expect("Failed to set");

    let other = h.manager.create_profile("other").expect("Failed to create");
    fs::write(
        h.registry().profile_config_file(&other),
        "a.y=3\na.z=4\n",
    )
    .expect("Failed to write profile file");
    h.take_events();

    h.manager.switch_profile(other.id).expect("Failed to switch");

    let events = h.take_events();
    assert_eq!(events.first(), Some(&ConfigEvent::ConfigSync));
    assert_eq!(events.last(), Some(&ConfigEvent::ProfileChanged));

    let changed: Vec<(String, Option<String>, Option<String>)> = changes(&events)
        .into_iter()
        .map(|c| (format!("{}.{}", c.group, c.key), c.old_value, c.new_value))
        .collect();
    assert_eq!(
        changed,
        vec![
            ("a.x".to_string(), Some("1".to_string()), None),
            ("a.y".to_string(), Some("2".to_string()), Some("3".to_string())),
            ("a.z".to_string(), None, Some("4".to_string())),
        ]
    );

    assert_eq!(h.manager.active_profile_id(), Some(other.id));
    assert!(h.profile(other.id).active);

    // the old profile was flushed before switching
    let old = fs::read_to_string(h.dir.path().join("profiles2/default.properties"))
        .expect("Failed to read profile file");
    assert!(old.contains("a.x=1"));
}

#[test]
fn test_reload_keeps_pending_writes() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");

    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.take_events();
    h.manager.load().expect("Failed to reload");

    assert_eq!(h.manager.get_configuration("a", "b").as_deref(), Some("1"));
    let file = h.dir.path().join("profiles2/default.properties");
    let contents = fs::read_to_string(&file).expect("Failed to read profile file");
    assert!(contents.contains("a.b=1"));

    let events = h.take_events();
    assert!(changes(&events).is_empty());
    assert_eq!(events.last(), Some(&ConfigEvent::ProfileChanged));
}

#[test]
fn test_reload_announces_differences() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");
    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.manager.send_config();

    // another process edits the file
    let file = h.dir.path().join("profiles2/default.properties");
    fs::write(&file, "a.b=1\na.c=2\n").expect("Failed to write profile file");
    h.take_events();

    h.manager.load().expect("Failed to reload");

    let changed = changes(&h.take_events());
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].group, "a");
    assert_eq!(changed[0].key, "c");
    assert_eq!(changed[0].old_value, None);
    assert_eq!(changed[0].new_value.as_deref(), Some("2"));
    assert_eq!(h.manager.get_configuration("a", "c").as_deref(), Some("2"));
}

#[test]
fn test_switch_to_internal_profile_is_refused() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");

    let rs = h
        .manager
        .list_profiles()
        .expect("Failed to list")
        .into_iter()
        .find(|p| p.name == RSPROFILE_NAME)
        .expect("$rsprofile");
    assert!(matches!(
        h.manager.switch_profile(rs.id),
        Err(Error::ProfileNotFound(_))
    ));
    assert!(matches!(
        h.manager.switch_profile(12345),
        Err(Error::ProfileNotFound(_))
    ));
}

#[test]
fn test_profile_management() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");
    let active = h.manager.active_profile_id().expect("loaded");

    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.manager.rename_profile(active, "main").expect("Failed to rename");
    h.manager.set_configuration("a", "c", "2").expect("Failed to set");
    h.manager.send_config();

    let main = fs::read_to_string(h.dir.path().join("profiles2/main.properties"))
        .expect("Failed to read renamed profile");
    assert!(main.contains("a.b=1"));
    assert!(main.contains("a.c=2"));

    let copy = h.manager.clone_profile(active, "copy").expect("Failed to clone");
    let copied = fs::read_to_string(h.registry().profile_config_file(&copy))
        .expect("Failed to read copy");
    assert!(copied.contains("a.c=2"));

    assert!(matches!(
        h.manager.delete_profile(active),
        Err(Error::ActiveProfile(_))
    ));
    h.manager.delete_profile(copy.id).expect("Failed to delete");
    assert!(
        h.manager
            .list_profiles()
            .expect("Failed to list")
            .iter()
            .all(|p| p.id != copy.id)
    );
    assert!(matches!(
        h.manager.create_profile("main"),
        Err(Error::ProfileExists(_))
    ));
}

#[test]
fn test_rename_keeps_writes_made_while_it_runs() {
    let h = harness(FakeRemote::default());
    h.manager.load().expect("Failed to load");
    let active = h.manager.active_profile_id().expect("loaded");
    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.take_events();

    let registry = h.registry();
    std::thread::scope(|scope| {
        // the rename flushes, then waits here for the registry
        let held = registry.lock().expect("Failed to lock registry");
        let rename = scope.spawn(|| h.manager.rename_profile(active, "main"));

        for _ in 0..500 {
            if h.events.lock().unwrap().contains(&ConfigEvent::ConfigSync) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(50));
        h.manager.set_configuration("a", "c", "2").expect("Failed to set");
        drop(held);

        rename
            .join()
            .expect("rename thread panicked")
            .expect("Failed to rename");
    });

    assert_eq!(h.manager.get_configuration("a", "c").as_deref(), Some("2"));
    h.manager.send_config();

    let main = fs::read_to_string(h.dir.path().join("profiles2/main.properties"))
        .expect("Failed to read renamed profile");
    assert!(main.contains("a.b=1"));
    assert!(main.contains("a.c=2"));
}

#[test]
fn test_failed_sync_upload_is_reported() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let manager = ConfigManager::new(
        common::settings(dir.path()),
        Arc::new(OfflineClient),
        Arc::new(NoopSink),
    );
    manager.switch_session(Some(session()));
    manager.load().expect("Failed to load");
    let active = manager.active_profile_id().expect("loaded");

    manager.set_configuration("a", "b", "1").expect("Failed to set");
    let err = manager.set_profile_sync(active, true).unwrap_err();
    assert!(matches!(err, Error::Remote(_)), "{err}");

    // the local flag is kept for the next load to reconcile
    let profile = manager
        .list_profiles()
        .expect("Failed to list")
        .into_iter()
        .find(|p| p.id == active)
        .expect("active profile");
    assert!(profile.sync);
    assert_eq!(profile.rev, -1);
}

#[test]
fn test_enabling_sync_uploads_profile() {
    let h = harness(FakeRemote::default());
    h.manager.switch_session(Some(session()));
    h.manager.load().expect("Failed to load");
    let active = h.manager.active_profile_id().expect("loaded");

    h.manager.set_configuration("a", "b", "1").expect("Failed to set");
    h.manager.set_profile_sync(active, true).expect("Failed to enable sync");

    {
        let state = h.remote.state.lock().unwrap();
        let uploaded = state.profiles.get(&active).expect("uploaded");
        assert_eq!(uploaded.values.get("a.b").map(String::as_str), Some("1"));
    }
    let profile = h.profile(active);
    assert!(profile.sync);
    assert_eq!(profile.rev, 1);

    h.manager.set_profile_sync(active, false).expect("Failed to disable sync");
    assert!(h.remote.state.lock().unwrap().deleted.contains(&active));
    let profile = h.profile(active);
    assert!(!profile.sync);
    assert_eq!(profile.rev, -1);
}

#[test]
fn test_legacy_settings_are_imported() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    fs::write(
        dir.path().join("settings.properties"),
        "grandexchange.quickLookup=false\nkillcount.rsprofile.abc.zulrah=12\n",
    )
    .expect("Failed to write legacy file");

    let h = harness_in(dir, FakeRemote::default());
    h.manager.load().expect("Failed to load");

    assert_eq!(
        h.manager.get::<bool>("grandexchange", "quickLookup"),
        Some(false)
    );
    assert_eq!(
        h.manager
            .get_in::<i32>("killcount", Some("rsprofile.abc"), "zulrah"),
        Some(12)
    );
    assert_eq!(
        h.manager
            .get_rs_profile_configuration_keys("killcount", "rsprofile.abc", ""),
        vec!["zulrah".to_string()]
    );
}

#[test]
fn test_values_survive_reload() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let root = dir.path().to_path_buf();
    {
        let h = harness_in(dir, FakeRemote::default());
        h.manager.load().expect("Failed to load");
        h.manager
            .set_configuration("a", "spaced key", " value with = and : ")
            .expect("Failed to set");
        h.manager.shutdown();

        let again = ConfigManager::new(
            common::settings(&root),
            Arc::new(FakeRemote::default()),
            Arc::new(NoopSink),
        );
        again.load().expect("Failed to reload");
        assert_eq!(
            again.get_configuration("a", "spaced key").as_deref(),
            Some(" value with = and : ")
        );
    }
}
