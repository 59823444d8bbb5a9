//! Account-scoped profiles stored inside the `$rsprofile` profile.
//!
//! Each account gets a key `rsprofile.<base64url>` derived from its
//! identity, so independent processes logging in with the same account
//! land on the same key without coordinating.
use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use sha2::{Digest, Sha512};

use crate::{
    error::{Error, Result},
    impl_config_enum,
    key::RSPROFILE_GROUP,
};

pub const ACCOUNT_HASH_INVALID: i64 = -1;

pub(crate) const DISPLAY_NAME: &str = "displayName";
pub(crate) const TYPE: &str = "type";
pub(crate) const LOGIN_HASH: &str = "loginHash";
pub(crate) const LOGIN_SALT: &str = "loginSalt";
pub(crate) const ACCOUNT_HASH: &str = "accountHash";

pub(crate) const SALT_LEN: usize = 15;
const KEY_LEN: usize = 6;
const PROBE_LIMIT: u8 = 0xff;

/// The kind of world an account is logged into; each gets its own profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RsProfileType {
    #[default]
    Standard,
    Beta,
    Deadman,
    Tournament,
    Seasonal,
}

impl_config_enum!(RsProfileType {
    Standard,
    Beta,
    Deadman,
    Tournament,
    Seasonal
});

impl RsProfileType {
    fn ordinal(self) -> u8 {
        match self {
            RsProfileType::Standard => 0,
            RsProfileType::Beta => 1,
            RsProfileType::Deadman => 2,
            RsProfileType::Tournament => 3,
            RsProfileType::Seasonal => 4,
        }
    }
}

/// The current external identity, queried on demand.
pub trait AccountIdentity: Send + Sync {
    /// Stable numeric account id, or [`ACCOUNT_HASH_INVALID`].
    fn account_hash(&self) -> i64;

    fn username(&self) -> Option<String>;

    fn display_name(&self) -> Option<String>;

    fn profile_type(&self) -> RsProfileType;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsProfile {
    pub display_name: Option<String>,
    pub profile_type: RsProfileType,
    pub login_hash: Option<Vec<u8>>,
    pub account_hash: i64,
    pub key: String,
}

pub fn login_hash(salt: &[u8], username: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(username.to_lowercase().as_bytes());
    hasher.finalize().to_vec()
}

/// Picks the first free key for a new account profile.
///
/// The base key is the low 6 bytes of the account hash (little endian), or
/// the first 6 bytes of the login hash when there is no account hash. The
/// first byte is offset by the profile type and the second byte is probed
/// until a key not in `taken` is found.
pub fn derive_key(
    account_hash: i64,
    login_hash: Option<&[u8]>,
    profile_type: RsProfileType,
    taken: &HashSet<String>,
) -> Result<String> {
    let mut key = [0u8; KEY_LEN];
    if account_hash != ACCOUNT_HASH_INVALID {
        key.copy_from_slice(&account_hash.to_le_bytes()[..KEY_LEN]);
    } else {
        let login_hash = login_hash.ok_or_else(|| Error::InvalidValue {
            key: LOGIN_HASH.to_string(),
            reason: "no account hash or login hash".to_string(),
        })?;
        let len = login_hash.len().min(KEY_LEN);
        key[..len].copy_from_slice(&login_hash[..len]);
    }
    key[0] = key[0].wrapping_add(profile_type.ordinal());

    for _ in 0..PROBE_LIMIT {
        let candidate = format!("{RSPROFILE_GROUP}.{}", URL_SAFE.encode(key));
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        key[1] = key[1].wrapping_add(1);
    }
    Err(Error::TooManyRsProfiles)
}

/// Finds the profiles matching an identity: by account hash when known,
/// otherwise by login hash. Only profiles of the same type match.
pub fn find_matches<'a>(
    profiles: &'a [RsProfile],
    profile_type: RsProfileType,
    account_hash: i64,
    login_hash: Option<&[u8]>,
) -> Vec<&'a RsProfile> {
    let mut matches = Vec::new();
    if account_hash != ACCOUNT_HASH_INVALID {
        matches = profiles
            .iter()
            .filter(|p| p.profile_type == profile_type && p.account_hash == account_hash)
            .collect();
    }

    if matches.is_empty() {
        if let Some(login_hash) = login_hash {
            matches = profiles
                .iter()
                .filter(|p| {
                    p.profile_type == profile_type && p.login_hash.as_deref() == Some(login_hash)
                })
                .collect();
        }
    }

    matches
}
