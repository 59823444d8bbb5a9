//! Typed config groups.
//!
//! A config group is a plain struct whose fields map to keys of one group.
//! The [`ConfigGroup`](macro@crate::ConfigGroup) derive macro generates the
//! item table and the constructor reading every field from a
//! [`ConfigManager`], and registers the group so that
//! [`ConfigManager::set_default_configuration_all`] can find it.
//!
//! ```rust
//! use profile_config::{Color, ConfigGroup};
//!
//! #[derive(Debug, ConfigGroup)]
//! #[config(group = "interacthighlight")]
//! pub struct InteractHighlightConfig {
//!     #[item(key = "showHover", default = true)]
//!     pub show_hover: bool,
//!     #[item(key = "hoverColor", default = Color::argb(0x90, 0x00, 0xff, 0xff))]
//!     pub hover_color: Color,
//!     #[item(key = "borderWidth", default = 4)]
//!     pub border_width: i32,
//!     #[item(key = "label")]
//!     pub label: String,
//! }
//! ```
use crate::manager::ConfigManager;

/// One declared item of a config group.
#[derive(Debug, Clone)]
pub struct ConfigItem {
    pub key: &'static str,
    /// The default value in stored form, `None` if the item has no default.
    pub default: Option<String>,
    /// Whether a stored string parses as the item's type.
    pub is_valid: fn(&str) -> bool,
}

pub trait ConfigGroup: Send + Sync + Sized + 'static {
    const GROUP: &'static str;

    fn items() -> Vec<ConfigItem>;

    /// Reads every item from `manager`, falling back to defaults.
    fn load(manager: &ConfigManager) -> Self;
}

/// Type-erased registration of a [`ConfigGroup`].
pub struct RegisteredGroup {
    pub group: fn() -> &'static str,
    pub items: fn() -> Vec<ConfigItem>,
}

impl RegisteredGroup {
    pub const fn new<T: ConfigGroup>() -> Self {
        Self {
            group: group_name::<T>,
            items: T::items,
        }
    }
}

fn group_name<T: ConfigGroup>() -> &'static str {
    T::GROUP
}

inventory::collect!(RegisteredGroup);

pub fn registered_groups() -> impl Iterator<Item = &'static RegisteredGroup> {
    inventory::iter::<RegisteredGroup>.into_iter()
}

#[macro_export]
macro_rules! submit_group {
    ($group_type:ty) => {
        $crate::inventory::submit! {
            $crate::RegisteredGroup::new::<$group_type>()
        }
    };
}
