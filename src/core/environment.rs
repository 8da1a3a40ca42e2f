//! Environment variable overrides.
//!
//! Components never read the process environment directly; they receive an
//! `EnvironmentVariables` value so tests and embedding applications control
//! exactly what is visible.

use std::collections::BTreeMap;

/// Overrides the install directory.
pub const INSTALL_DIR_VAR: &str = "SCANJOB_INSTALL_DIR";

/// Points at an existing scanner executable.
pub const SCANNER_PATH_VAR: &str = "SCANJOB_SCANNER_PATH";

/// Overrides the working directory used for scan output.
pub const WORKING_DIR_VAR: &str = "SCANJOB_WORKING_DIR";

/// A snapshot of environment variables.
///
/// # Examples
///
/// ```rust
/// use scanjob::core::EnvironmentVariables;
///
/// let env = EnvironmentVariables::empty().with("SCANJOB_INSTALL_DIR", "/opt/scanner");
/// assert_eq!(env.get("SCANJOB_INSTALL_DIR"), Some("/opt/scanner"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariables {
    vars: BTreeMap<String, String>,
}

impl EnvironmentVariables {
    /// Creates an empty set of variables.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Captures the current process environment.
    ///
    /// Variables that are not valid unicode are skipped.
    pub fn from_system() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// Adds or replaces a variable.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Adds or replaces a variable in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Returns the value of a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns the value of a variable if it is set and not blank.
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Returns `true` if the variable is set.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterates over all variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
