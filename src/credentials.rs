//! Operator credential loading.
//!
//! Credentials live in `~/.remcon/credentials.toml` and are loaded
//! before the command loop starts; a validation failure there is fatal.
//! Only the operator-facing surface is handled here: the role recorded
//! in session logs and an optional key identifier. The storage format of
//! actual key material belongs to the server side.
//!
//! ```toml
//! role = "control"
//! key_id = "operator-01"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::config::home_dir;

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Credentials file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read credentials: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to parse credentials: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("Credentials have no role set")]
    MissingRole,

    #[error("Credentials file is readable by other users (mode {0:o})")]
    Insecure(u32),
}

pub type Result<T> = std::result::Result<T, CredentialsError>;

/// Default role when running without a credentials file.
pub const DEFAULT_ROLE: &str = "control";

/// Operator credentials
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Role recorded against the session
    pub role: String,
    /// Optional key identifier
    #[serde(default)]
    pub key_id: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            role: DEFAULT_ROLE.to_string(),
            key_id: None,
        }
    }
}

impl Credentials {
    /// Load credentials from the default location.
    ///
    /// With `validate` set, a missing file, an empty role, or a file
    /// readable by other users is an error. Without it, a missing file
    /// degrades to the default role.
    pub fn load(validate: bool) -> Result<Self> {
        let path = Self::credentials_path();
        match path {
            Some(ref path) if path.exists() => Self::load_from(path, validate),
            Some(path) => {
                if validate {
                    Err(CredentialsError::NotFound(path))
                } else {
                    Ok(Self::default())
                }
            }
            None => Ok(Self::default()),
        }
    }

    /// Load credentials from a specific file.
    pub fn load_from(path: &Path, validate: bool) -> Result<Self> {
        if validate {
            check_permissions(path)?;
        }

        let content = fs::read_to_string(path).map_err(CredentialsError::Read)?;
        let credentials = Self::parse(&content)?;

        if validate && credentials.role.trim().is_empty() {
            return Err(CredentialsError::MissingRole);
        }

        Ok(credentials)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(CredentialsError::Parse)
    }

    fn credentials_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".remcon").join("credentials.toml"))
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::metadata(path).map_err(CredentialsError::Read)?;
    let mode = metadata.mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(CredentialsError::Insecure(mode));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let credentials =
            Credentials::parse("role = \"control\"\nkey_id = \"operator-01\"\n").unwrap();
        assert_eq!(credentials.role, "control");
        assert_eq!(credentials.key_id.as_deref(), Some("operator-01"));
    }

    #[test]
    fn test_parse_role_only() {
        let credentials = Credentials::parse("role = \"audit\"\n").unwrap();
        assert_eq!(credentials.role, "audit");
        assert!(credentials.key_id.is_none());
    }

    #[test]
    fn test_parse_missing_role_is_error() {
        assert!(Credentials::parse("key_id = \"x\"\n").is_err());
    }

    #[test]
    fn test_default_role() {
        assert_eq!(Credentials::default().role, DEFAULT_ROLE);
    }
}
