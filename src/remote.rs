//! The remote config service, as seen by the manager.
//!
//! Only the trait lives here; the HTTP client implementing it is supplied by
//! the embedding application. Every failure is a [`RemoteError`] and callers
//! treat it as "remote unavailable, continue local-only".

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("remote profile {0} not found")]
    NotFound(i64),
}

/// An authenticated account session with the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSession {
    pub uuid: Uuid,
    pub username: Option<String>,
}

impl AccountSession {
    pub fn new(uuid: Uuid, username: Option<String>) -> Self {
        Self { uuid, username }
    }
}

/// A profile as listed by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProfile {
    pub id: i64,
    pub name: String,
    pub rev: i64,
}

/// A full snapshot of one remote profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub values: HashMap<String, String>,
    pub rev: i64,
}

/// Incremental change set sent to the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub edit: BTreeMap<String, String>,
    pub unset: BTreeSet<String>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.edit.is_empty() && self.unset.is_empty()
    }
}

pub trait RemoteConfigClient: Send + Sync {
    fn list(&self, session: &AccountSession) -> Result<Vec<RemoteProfile>, RemoteError>;

    fn get(&self, session: &AccountSession, id: i64) -> Result<RemoteConfig, RemoteError>;

    /// Applies `patch` to profile `id`, returning the new revision.
    fn patch(
        &self,
        session: &AccountSession,
        patch: &ConfigPatch,
        id: i64,
    ) -> Result<i64, RemoteError>;

    fn delete(&self, session: &AccountSession, id: i64) -> Result<(), RemoteError>;

    fn rename(&self, session: &AccountSession, id: i64, name: &str) -> Result<(), RemoteError>;
}

/// Client for running without a remote service. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineClient;

impl RemoteConfigClient for OfflineClient {
    fn list(&self, _session: &AccountSession) -> Result<Vec<RemoteProfile>, RemoteError> {
        Err(RemoteError::Transport("offline".into()))
    }

    fn get(&self, _session: &AccountSession, _id: i64) -> Result<RemoteConfig, RemoteError> {
        Err(RemoteError::Transport("offline".into()))
    }

    fn patch(
        &self,
        _session: &AccountSession,
        _patch: &ConfigPatch,
        _id: i64,
    ) -> Result<i64, RemoteError> {
        Err(RemoteError::Transport("offline".into()))
    }

    fn delete(&self, _session: &AccountSession, _id: i64) -> Result<(), RemoteError> {
        Err(RemoteError::Transport("offline".into()))
    }

    fn rename(&self, _session: &AccountSession, _id: i64, _name: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Transport("offline".into()))
    }
}
