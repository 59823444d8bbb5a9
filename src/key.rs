//! Flat key encoding.
//!
//! Every value is stored under a single string key. Plain settings use
//! `group.key`; settings scoped to an account profile use
//! `group.rsprofile.<id>.key`, where the profile segment keeps its
//! `rsprofile.` prefix.

use crate::error::{Error, Result};

pub const RSPROFILE_GROUP: &str = "rsprofile";

/// The three parts of a flat key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SplitKey {
    pub group: String,
    pub profile: Option<String>,
    pub key: String,
}

pub fn whole_key(group: &str, profile: Option<&str>, key: &str) -> String {
    match profile {
        Some(profile) => format!("{group}.{profile}.{key}"),
        None => format!("{group}.{key}"),
    }
}

/// Splits a flat key into group, optional profile and key.
///
/// Returns `None` when there is no group separator, or when a profile
/// segment is started but never terminated.
pub fn split_key(flat: &str) -> Option<SplitKey> {
    let (group, rest) = flat.split_once('.')?;

    if let Some(id_and_key) = rest
        .strip_prefix(RSPROFILE_GROUP)
        .and_then(|r| r.strip_prefix('.'))
    {
        // the profile id is never empty, so the first character can't end it
        let (end, _) = id_and_key.char_indices().skip(1).find(|(_, c)| *c == '.')?;
        let end = end + RSPROFILE_GROUP.len() + 1;
        let profile = rest.get(..end)?;
        let key = rest.get(end + 1..)?;
        return Some(SplitKey {
            group: group.to_string(),
            profile: Some(profile.to_string()),
            key: key.to_string(),
        });
    }

    Some(SplitKey {
        group: group.to_string(),
        profile: None,
        key: rest.to_string(),
    })
}

/// [`split_key`] for keys coming from outside, e.g. an imported file.
pub fn parse_key(flat: &str) -> Result<SplitKey> {
    split_key(flat).ok_or_else(|| Error::MalformedKey(flat.to_string()))
}

/// Group and key must be non-empty, and keys must not contain `:`.
pub fn is_valid(group: &str, key: &str) -> bool {
    !group.is_empty() && !key.is_empty() && !key.contains(':')
}
