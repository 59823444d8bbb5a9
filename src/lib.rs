extern crate self as profile_config;

pub mod atomic;
pub mod config;
pub mod error;
pub mod event;
pub mod global;
pub mod key;
pub mod manager;
pub mod migration;
pub mod profile;
pub mod properties;
pub mod remote;
pub mod rsprofile;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod value;

pub use config::{ConfigGroup, ConfigItem, RegisteredGroup, registered_groups};
pub use error::{Error, Error as ConfigError, Result};
pub use event::{ConfigChanged, ConfigEvent, EventSink, NoopSink};
pub use manager::ConfigManager;
pub use profile::{Profile, ProfileRegistry};
pub use remote::{
    AccountSession, ConfigPatch, OfflineClient, RemoteConfig, RemoteConfigClient, RemoteError,
    RemoteProfile,
};
pub use rsprofile::{AccountIdentity, RsProfile, RsProfileType};
pub use scheduler::FlushScheduler;
pub use settings::ManagerSettings;
pub use store::{Changes, PropertyStore};
pub use value::{Color, ConfigValue, Dimension, Point, Rectangle, ValueError};

// re-export macro
pub use profile_config_macros::ConfigGroup;

#[doc(hidden)]
pub use inventory;
