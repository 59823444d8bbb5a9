//! One-time import of the single-file config that predates profiles.
use std::{collections::HashMap, path::Path};

use tracing::{info, warn};

use crate::{
    atomic::{self, LoadResult},
    error::Result,
    key::parse_key,
    profile::{DEFAULT_PROFILE, Lock, ProfileRegistry, RSPROFILE_NAME},
    properties,
};

/// Imports `legacy` into a fresh `default` profile and the `$rsprofile`
/// profile. Keys scoped to an account profile go to `$rsprofile`, the rest
/// to `default`.
///
/// Only runs against an empty registry, so it happens at most once. The
/// legacy file is left untouched. Returns whether anything was imported.
pub fn migrate_legacy(lock: &mut Lock<'_>, registry: &ProfileRegistry, legacy: &Path) -> Result<bool> {
    if !lock.profiles().is_empty() {
        return Ok(false);
    }

    let contents = match atomic::read_if_exists(legacy)? {
        LoadResult::Loaded(contents) => contents,
        LoadResult::NotFound => return Ok(false),
    };

    let mut plain = HashMap::new();
    let mut scoped = HashMap::new();
    for (key, value) in properties::parse(&contents) {
        match parse_key(&key) {
            Ok(split) if split.profile.is_some() => {
                scoped.insert(key, value);
            }
            Ok(_) => {
                plain.insert(key, value);
            }
            Err(err) => warn!(%err, "skipping legacy key"),
        }
    }

    let mut profile = lock.create_profile(DEFAULT_PROFILE)?;
    let mut rs_profile = lock.create_profile(RSPROFILE_NAME)?;
    if let Some(p) = lock.find_profile_mut(profile.id) {
        p.active = true;
        profile = p.clone();
    }
    if let Some(p) = lock.find_profile_mut(rs_profile.id) {
        p.sync = true;
        rs_profile = p.clone();
    }
    lock.dirty();

    atomic::write_atomic(&registry.profile_config_file(&profile), &properties::store(&plain))?;
    atomic::write_atomic(
        &registry.profile_config_file(&rs_profile),
        &properties::store(&scoped),
    )?;

    info!(
        legacy = ?legacy,
        plain = plain.len(),
        scoped = scoped.len(),
        "migrated legacy configuration"
    );
    Ok(true)
}
