use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persisting {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML Deserialization: {0}")]
    TomlDeserialization(#[from] toml::de::Error),

    /// A group or key was rejected before anything was written.
    ///
    /// Groups and keys must be non-empty and keys must not contain `:`,
    /// which is reserved inside value encodings.
    #[error("Invalid config key {group:?}.{key:?}")]
    InvalidKey { group: String, key: String },

    #[error("Malformed flat key: {0}")]
    MalformedKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    /// The active profile can't be removed out from under its open store.
    #[error("Profile {0} is active")]
    ActiveProfile(String),

    #[error("Config manager has not been loaded")]
    NotLoaded,

    #[error("Remote: {0}")]
    Remote(#[from] RemoteError),

    /// Every candidate key for a new account profile is taken.
    ///
    /// This is the only error that aborts the calling operation outright;
    /// it means the registry is corrupt or the key space collided.
    #[error("Too many rs profiles")]
    TooManyRsProfiles,
}
