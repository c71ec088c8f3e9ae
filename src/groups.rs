//! Named instance groups loaded from YAML configuration files.
//!
//! The file format is a flat mapping from group name to a list of instance
//! ids:
//!
//! ```yaml
//! web: [i-0abc, i-0def]
//! workers: [i-0123, i-0456]
//! ```
//!
//! Two locations are consulted: the site-wide file (`/etc/imgr.yaml`) and
//! the per-user file (`~/.imgr.yaml`). When a group name appears in both,
//! the user entry wins. A missing file is skipped; a file that exists but
//! does not parse as the expected mapping is a hard error.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::resource::ResourceId;

const SITE_CONFIG_PATH: &str = "/etc/imgr.yaml";
const USER_CONFIG_FILE: &str = ".imgr.yaml";

/// Errors raised while loading or querying group configuration.
#[derive(Debug, Error)]
pub enum GroupsError {
    /// Raised when a configuration file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a configuration file is not a mapping from group name to
    /// a list of instance ids.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a requested group is not defined in any file.
    #[error("instance group '{0}' is not defined in any config file")]
    UnknownGroup(String),
}

/// Validated group configuration merged from site and user files.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Groups {
    entries: BTreeMap<String, Vec<String>>,
}

impl Groups {
    /// Loads groups from the default site and user locations.
    ///
    /// # Errors
    ///
    /// Returns [`GroupsError`] when a present file cannot be read or parsed.
    pub fn load_default() -> Result<Self, GroupsError> {
        let user_path = env::var_os("HOME").map(|home| {
            let mut path = Utf8PathBuf::from(home.to_string_lossy().into_owned());
            path.push(USER_CONFIG_FILE);
            path
        });
        Self::from_paths(
            Utf8Path::new(SITE_CONFIG_PATH),
            user_path.as_deref().unwrap_or(Utf8Path::new(USER_CONFIG_FILE)),
        )
    }

    /// Loads and merges groups from explicit site and user paths.
    ///
    /// # Errors
    ///
    /// Returns [`GroupsError`] when a present file cannot be read or parsed.
    pub fn from_paths(site: &Utf8Path, user: &Utf8Path) -> Result<Self, GroupsError> {
        let mut entries = BTreeMap::new();
        if let Some(site_entries) = load_file(site)? {
            entries.extend(site_entries);
        }
        if let Some(user_entries) = load_file(user)? {
            // User entries override site entries on key collision.
            entries.extend(user_entries);
        }
        Ok(Self { entries })
    }

    /// Resolves a group name to its instance identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`GroupsError::UnknownGroup`] when the name is not defined.
    pub fn resolve(&self, name: &str) -> Result<Vec<ResourceId>, GroupsError> {
        self.entries
            .get(name)
            .map(|ids| ids.iter().map(|id| ResourceId::from(id.as_str())).collect())
            .ok_or_else(|| GroupsError::UnknownGroup(name.to_owned()))
    }

    /// Returns the defined group names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Returns true when no groups are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn load_file(path: &Utf8Path) -> Result<Option<BTreeMap<String, Vec<String>>>, GroupsError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(GroupsError::Io {
                path: path.to_owned(),
                message: err.to_string(),
            });
        }
    };

    serde_yaml::from_str(&raw)
        .map(Some)
        .map_err(|err| GroupsError::Parse {
            path: path.to_owned(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests;
