//! Conversion between typed values and their stored string form.
//!
//! Each supported type implements [`ConfigValue`]; the stored encodings are:
//!
//! | type | encoding |
//! |------|----------|
//! | integers, `f64`, `String` | `to_string` / `parse` |
//! | `bool` | `true` / `false`, any case on read |
//! | [`Color`] | signed 32-bit ARGB as decimal, `#RRGGBB` / `#AARRGGBB` accepted on read |
//! | [`Dimension`] | `WxH` |
//! | [`Point`] | `x:y` |
//! | [`Rectangle`] | `x:y:w:h` |
//! | [`Duration`] | milliseconds |
//! | [`DateTime<Utc>`] | RFC 3339 |
//! | `Vec<u8>` | URL-safe base64 |
//! | `BTreeSet<T>` | JSON array |
//!
//! Enums opt in with [`impl_config_enum!`](crate::impl_config_enum).
use std::{collections::BTreeSet, str::FromStr, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValueError(pub String);

pub trait ConfigValue: Sized {
    fn from_config_str(s: &str) -> Result<Self, ValueError>;
    fn to_config_string(&self) -> String;
}

macro_rules! impl_parsed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ConfigValue for $ty {
                fn from_config_str(s: &str) -> Result<Self, ValueError> {
                    s.trim()
                        .parse()
                        .map_err(|err| ValueError(format!("{s:?} is not a {}: {err}", stringify!($ty))))
                }

                fn to_config_string(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_parsed!(i32, i64, u32, u64, f64);

impl ConfigValue for bool {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if s.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(ValueError(format!("{s:?} is not a bool")))
        }
    }

    fn to_config_string(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for String {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        Ok(s.to_string())
    }

    fn to_config_string(&self) -> String {
        self.clone()
    }
}

/// An ARGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { a: 0xff, r, g, b }
    }

    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    pub fn to_argb(self) -> u32 {
        u32::from_be_bytes([self.a, self.r, self.g, self.b])
    }

    pub fn from_argb(argb: u32) -> Self {
        let [a, r, g, b] = argb.to_be_bytes();
        Self { a, r, g, b }
    }
}

impl ConfigValue for Color {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        let s = s.trim();
        let invalid = || ValueError(format!("{s:?} is not a color"));

        if let Some(hex) = s.strip_prefix('#') {
            let value = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
            return match hex.len() {
                6 => Ok(Self::from_argb(0xff00_0000 | value)),
                8 => Ok(Self::from_argb(value)),
                _ => Err(invalid()),
            };
        }

        let value = s.parse::<i32>().map_err(|_| invalid())?;
        Ok(Self::from_argb(u32::from_ne_bytes(value.to_ne_bytes())))
    }

    fn to_config_string(&self) -> String {
        i32::from_ne_bytes(self.to_argb().to_ne_bytes()).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

fn parse_ints<const N: usize>(s: &str, sep: char, what: &str) -> Result<[i32; N], ValueError> {
    let invalid = || ValueError(format!("{s:?} is not a {what}"));
    let mut out = [0; N];
    let mut parts = s.split(sep);
    for slot in out.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        *slot = part.trim().parse().map_err(|_| invalid())?;
    }
    match parts.next() {
        Some(_) => Err(invalid()),
        None => Ok(out),
    }
}

impl ConfigValue for Dimension {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        let [width, height] = parse_ints(s, 'x', "dimension")?;
        Ok(Self { width, height })
    }

    fn to_config_string(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl ConfigValue for Point {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        let [x, y] = parse_ints(s, ':', "point")?;
        Ok(Self { x, y })
    }

    fn to_config_string(&self) -> String {
        format!("{}:{}", self.x, self.y)
    }
}

impl ConfigValue for Rectangle {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        let [x, y, width, height] = parse_ints(s, ':', "rectangle")?;
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    fn to_config_string(&self) -> String {
        format!("{}:{}:{}:{}", self.x, self.y, self.width, self.height)
    }
}

impl ConfigValue for Duration {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        let millis = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ValueError(format!("{s:?} is not a duration in milliseconds")))?;
        Ok(Duration::from_millis(millis))
    }

    fn to_config_string(&self) -> String {
        self.as_millis().to_string()
    }
}

impl ConfigValue for DateTime<Utc> {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|err| ValueError(format!("{s:?} is not a timestamp: {err}")))
    }

    fn to_config_string(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl ConfigValue for Vec<u8> {
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        URL_SAFE
            .decode(s.trim())
            .map_err(|err| ValueError(format!("{s:?} is not base64: {err}")))
    }

    fn to_config_string(&self) -> String {
        URL_SAFE.encode(self)
    }
}

impl<T> ConfigValue for BTreeSet<T>
where
    T: Ord + Serialize + DeserializeOwned,
{
    fn from_config_str(s: &str) -> Result<Self, ValueError> {
        serde_json::from_str(s).map_err(|err| ValueError(format!("{s:?} is not a set: {err}")))
    }

    fn to_config_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Implements [`ConfigValue`] for a fieldless enum, stored by variant name.
///
/// ```rust
/// use profile_config::{ConfigValue, impl_config_enum};
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum RenderStyle {
///     Outline,
///     Fill,
/// }
///
/// impl_config_enum!(RenderStyle { Outline, Fill });
///
/// assert_eq!(RenderStyle::from_config_str("Fill").ok(), Some(RenderStyle::Fill));
/// assert_eq!(RenderStyle::Outline.to_config_string(), "Outline");
/// ```
#[macro_export]
macro_rules! impl_config_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::ConfigValue for $ty {
            fn from_config_str(s: &str) -> ::std::result::Result<Self, $crate::ValueError> {
                match s {
                    $(stringify!($variant) => Ok($ty::$variant),)+
                    other => Err($crate::ValueError(format!(
                        "{other:?} is not a {}",
                        stringify!($ty)
                    ))),
                }
            }

            fn to_config_string(&self) -> ::std::string::String {
                match self {
                    $($ty::$variant => stringify!($variant).to_string(),)+
                }
            }
        }
    };
}

impl FromStr for Color {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_config_str(s)
    }
}
