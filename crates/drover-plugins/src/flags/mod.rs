//! Driver-declared flags and the option bag that carries their values.
//!
//! A backend describes its creation options as [`FlagDescriptor`]s. The
//! descriptors cross the plugin boundary so the command surface can be built
//! without linking backend code. Values travel back as [`DriverOptions`], a
//! map of tagged [`FlagValue`]s whose accessors fail on a kind mismatch
//! instead of handing out a zero value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

/// Kind of value a flag carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Single string.
    String,
    /// List of strings.
    StringSlice,
    /// Signed integer.
    Int,
    /// Boolean switch.
    Bool,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::String => "string",
            Self::StringSlice => "string-slice",
            Self::Int => "int",
            Self::Bool => "bool",
        };
        f.write_str(label)
    }
}

/// A flag value tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FlagValue {
    /// Single string.
    String(String),
    /// List of strings.
    StringSlice(Vec<String>),
    /// Signed integer.
    Int(i64),
    /// Boolean switch.
    Bool(bool),
}

impl FlagValue {
    /// Returns the kind tag of this value.
    #[must_use]
    pub const fn kind(&self) -> FlagKind {
        match self {
            Self::String(_) => FlagKind::String,
            Self::StringSlice(_) => FlagKind::StringSlice,
            Self::Int(_) => FlagKind::Int,
            Self::Bool(_) => FlagKind::Bool,
        }
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for FlagValue {
    fn from(value: Vec<String>) -> Self {
        Self::StringSlice(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Declaration of one backend creation flag.
///
/// # Example
///
/// ```
/// use drover_plugins::flags::{FlagDescriptor, FlagKind};
///
/// let flag = FlagDescriptor::int("fake-disk-size", "Disk size in MB", 20_000)
///     .with_env_var("FAKE_DISK_SIZE");
/// assert_eq!(flag.kind(), FlagKind::Int);
/// assert_eq!(flag.env_var(), Some("FAKE_DISK_SIZE"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDescriptor {
    name: String,
    #[serde(default)]
    usage: String,
    default: FlagValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    env_var: Option<String>,
}

impl FlagDescriptor {
    /// Creates a descriptor with an explicit default value.
    #[must_use]
    pub fn new(name: impl Into<String>, usage: impl Into<String>, default: FlagValue) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            default,
            env_var: None,
        }
    }

    /// Creates a string flag.
    #[must_use]
    pub fn string(name: impl Into<String>, usage: impl Into<String>, default: &str) -> Self {
        Self::new(name, usage, FlagValue::from(default))
    }

    /// Creates a string-list flag.
    #[must_use]
    pub fn string_slice(
        name: impl Into<String>,
        usage: impl Into<String>,
        default: Vec<String>,
    ) -> Self {
        Self::new(name, usage, FlagValue::StringSlice(default))
    }

    /// Creates an integer flag.
    #[must_use]
    pub fn int(name: impl Into<String>, usage: impl Into<String>, default: i64) -> Self {
        Self::new(name, usage, FlagValue::Int(default))
    }

    /// Creates a boolean flag, off by default.
    #[must_use]
    pub fn bool(name: impl Into<String>, usage: impl Into<String>) -> Self {
        Self::new(name, usage, FlagValue::Bool(false))
    }

    /// Attaches an environment-variable alias.
    #[must_use]
    pub fn with_env_var(mut self, env_var: impl Into<String>) -> Self {
        self.env_var = Some(env_var.into());
        self
    }

    /// Flag name without leading dashes.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Help text.
    #[must_use]
    pub const fn usage(&self) -> &str {
        self.usage.as_str()
    }

    /// Default value.
    #[must_use]
    pub const fn default_value(&self) -> &FlagValue {
        &self.default
    }

    /// Kind of value the flag accepts.
    #[must_use]
    pub const fn kind(&self) -> FlagKind {
        self.default.kind()
    }

    /// Environment-variable alias, if any.
    #[must_use]
    pub fn env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }
}

/// Flag values handed to [`Driver::set_config_from_flags`](crate::Driver::set_config_from_flags).
///
/// # Example
///
/// ```
/// use drover_plugins::flags::{DriverOptions, FlagDescriptor};
///
/// let declared = vec![FlagDescriptor::string("fake-ip", "Address", "10.0.2.15")];
/// let mut options = DriverOptions::from_defaults(&declared);
/// options.set("fake-ip", "192.168.99.100");
/// assert_eq!(options.string("fake-ip").unwrap(), "192.168.99.100");
/// assert!(options.int("fake-ip").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverOptions {
    values: BTreeMap<String, FlagValue>,
}

impl DriverOptions {
    /// Creates an empty option bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a bag with every declared flag's default value.
    #[must_use]
    pub fn from_defaults(flags: &[FlagDescriptor]) -> Self {
        let values = flags
            .iter()
            .map(|flag| (flag.name().to_owned(), flag.default_value().clone()))
            .collect();
        Self { values }
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Builder-style variant of [`DriverOptions::set`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Overlays every value from `overrides` onto this bag.
    pub fn merge(&mut self, overrides: &Self) {
        for (name, value) in &overrides.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Raw tagged value, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.values.get(name)
    }

    /// Reads a string flag.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingFlag`] when absent and
    /// [`DriverError::FlagType`] when the stored value is another kind.
    pub fn string(&self, name: &str) -> DriverResult<&str> {
        match self.require(name)? {
            FlagValue::String(value) => Ok(value.as_str()),
            other => Err(mismatch(name, FlagKind::String, other)),
        }
    }

    /// Reads a string-list flag.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingFlag`] when absent and
    /// [`DriverError::FlagType`] when the stored value is another kind.
    pub fn string_slice(&self, name: &str) -> DriverResult<&[String]> {
        match self.require(name)? {
            FlagValue::StringSlice(values) => Ok(values.as_slice()),
            other => Err(mismatch(name, FlagKind::StringSlice, other)),
        }
    }

    /// Reads an integer flag.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingFlag`] when absent and
    /// [`DriverError::FlagType`] when the stored value is another kind.
    pub fn int(&self, name: &str) -> DriverResult<i64> {
        match self.require(name)? {
            FlagValue::Int(value) => Ok(*value),
            other => Err(mismatch(name, FlagKind::Int, other)),
        }
    }

    /// Reads a boolean flag.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingFlag`] when absent and
    /// [`DriverError::FlagType`] when the stored value is another kind.
    pub fn bool(&self, name: &str) -> DriverResult<bool> {
        match self.require(name)? {
            FlagValue::Bool(value) => Ok(*value),
            other => Err(mismatch(name, FlagKind::Bool, other)),
        }
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlagValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no values are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> DriverResult<&FlagValue> {
        self.values.get(name).ok_or_else(|| DriverError::MissingFlag {
            name: name.to_owned(),
        })
    }
}

fn mismatch(name: &str, expected: FlagKind, actual: &FlagValue) -> DriverError {
    DriverError::FlagType {
        name: name.to_owned(),
        expected,
        actual: actual.kind(),
    }
}
