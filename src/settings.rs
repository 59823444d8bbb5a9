use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use derive_builder::Builder;
use serde::{Deserialize, Deserializer};

use crate::error::Result;

pub const LEGACY_CONFIG_FILE: &str = "settings.properties";

/// Settings for a [`ConfigManager`](crate::ConfigManager).
///
/// Build them in code:
///
/// ```rust
/// use profile_config::ManagerSettings;
///
/// let settings = ManagerSettings::builder()
///     .config_dir("/home/me/.app/profiles2")
///     .profile_name("pvm")
///     .build()
///     .expect("every field has a default");
/// assert_eq!(settings.profile_name.as_deref(), Some("pvm"));
/// ```
///
/// or read them from TOML, where durations are whole seconds:
///
/// ```toml
/// config_dir = "/home/me/.app/profiles2"
/// flush_interval_secs = 60
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct ManagerSettings {
    /// Directory holding `profiles.json` and the profile data files.
    #[builder(setter(into))]
    pub config_dir: PathBuf,

    /// Pre-profile config file imported once into an empty registry.
    /// Defaults to `settings.properties` next to `config_dir`.
    #[builder(setter(into, strip_option))]
    pub legacy_config_file: Option<PathBuf>,

    /// Profile to activate on load instead of the registry's active one.
    #[builder(setter(into, strip_option))]
    pub profile_name: Option<String>,

    #[serde(rename = "flush_initial_delay_secs", deserialize_with = "deserialize_secs")]
    pub flush_initial_delay: Duration,

    #[serde(rename = "flush_interval_secs", deserialize_with = "deserialize_secs")]
    pub flush_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("profiles2"),
            legacy_config_file: None,
            profile_name: None,
            flush_initial_delay: Duration::from_secs(30),
            flush_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl ManagerSettings {
    pub fn builder() -> ManagerSettingsBuilder {
        ManagerSettingsBuilder::default()
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    pub fn legacy_config_path(&self) -> PathBuf {
        match &self.legacy_config_file {
            Some(path) => path.clone(),
            None => self
                .config_dir
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .join(LEGACY_CONFIG_FILE),
        }
    }
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}
