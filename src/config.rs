//! Configuration file handling for remcon.
//!
//! The configuration file is located at `~/.remcon/config.toml`:
//!
//! ```toml
//! # Listener bind address
//! listen = "127.0.0.1:4444"
//!
//! # Remote interpreter: "cmd.exe" or "sh" enable prompt installation;
//! # anything else leaves the remote prompt alone
//! interpreter = "sh"
//!
//! # Terminate forwarded lines with CRLF instead of LF
//! crlf = false
//!
//! # Remote character encoding label (optional)
//! codepage = "windows-1252"
//!
//! # Prompt installed on the remote shell at session start
//! prompt = "# "
//! ```
//!
//! Missing file or unreadable content silently falls back to defaults;
//! command-line flags override file values.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::session::DEFAULT_PROMPT;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener bind address
    pub listen: String,
    /// Remote interpreter label
    pub interpreter: Option<String>,
    /// CRLF line termination toward the remote shell
    pub crlf: bool,
    /// Remote character encoding label
    pub codepage: Option<String>,
    /// Prompt installed at session start
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4444".to_string(),
            interpreter: None,
            crlf: false,
            codepage: None,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), String> {
        if let Some(path) = Self::get_config_path() {
            let content = toml::to_string_pretty(self)
                .map_err(|e| format!("Failed to serialize config: {}", e))?;
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
            Ok(())
        } else {
            Err("Could not determine config path".to_string())
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Some(home) = home_dir() {
            let remcon_dir = home.join(".remcon");
            if !remcon_dir.exists() {
                let _ = fs::create_dir_all(&remcon_dir);
            }
            return Some(remcon_dir.join("config.toml"));
        }
        None
    }
}

// Get home directory
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
