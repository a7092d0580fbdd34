use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ai::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::session::FailedTurnPolicy;
use crate::store::ConversationStore;

/// Environment variable holding the Gemini API key
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
/// Environment variable overriding the history file location
pub const HISTORY_ENV: &str = "GEMCHAT_HISTORY";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub history_path: Option<PathBuf>,
    pub failed_turn_policy: Option<FailedTurnPolicy>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the config file, or defaults when it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)
            .map_err(|e| anyhow!("Invalid config file {:?}: {}", path, e))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Read a `.env` file from the working directory into the environment, if present.
    pub fn load_dotenv() {
        let _ = dotenvy::dotenv();
    }

    /// API key: environment first, then the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn resolve_model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn resolve_api_base(&self) -> String {
        self.api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// History file: environment first, then the config file, then the default.
    pub fn resolve_history_path(&self) -> Result<PathBuf> {
        if let Ok(path) = std::env::var(HISTORY_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        if let Some(path) = &self.history_path {
            return Ok(path.clone());
        }
        ConversationStore::default_path()
            .ok_or_else(|| anyhow!("Could not determine data directory"))
    }

    pub fn resolve_failed_turn_policy(&self) -> FailedTurnPolicy {
        self.failed_turn_policy.unwrap_or_default()
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("gemchat").join("config.json"))
    }
}
