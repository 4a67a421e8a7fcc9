//! Client configuration stored in ~/.remcli/config.json
//!
//! Only consulted for values not given as flags or environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemcliConfig {
    /// Server base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Basic credentials as `user:password` or `@file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

pub struct ConfigManager;

impl ConfigManager {
    fn get_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".remcli").join("config.json"))
    }

    /// Load the user's configuration; a missing file is an empty config
    pub fn load() -> Result<RemcliConfig> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<RemcliConfig> {
        if !path.exists() {
            return Ok(RemcliConfig::default());
        }

        let json =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        serde_json::from_str(&json).context(format!("Failed to parse config file: {:?}", path))
    }
}
