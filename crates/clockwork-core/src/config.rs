//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the session store backend and the last
//! email used to sign in.
//!
//! Configuration is stored at `~/.config/clockwork/config.json`. The
//! `CLOCKWORK_API_URL` and `CLOCKWORK_STORE` environment variables take
//! precedence over the file.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::{FileStore, KeyValueStore, KeyringStore};

/// Application name used for config/cache directory paths and the keychain service
pub const APP_NAME: &str = "clockwork";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API used when neither the config file nor the environment names one
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

pub const API_URL_ENV: &str = "CLOCKWORK_API_URL";
pub const STORE_ENV: &str = "CLOCKWORK_STORE";

/// Where the session token and user are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// `session.json` in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "keyring" | "keychain" => Ok(StoreBackend::Keyring),
            other => Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub store_backend: StoreBackend,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// API base URL: environment, then config file, then the default
    pub fn api_base_url(&self) -> String {
        self.resolve_api_base_url(std::env::var(API_URL_ENV).ok())
    }

    fn resolve_api_base_url(&self, env_value: Option<String>) -> String {
        env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Store backend: environment, then config file
    pub fn store_backend(&self) -> Result<StoreBackend> {
        self.resolve_store_backend(std::env::var(STORE_ENV).ok())
    }

    fn resolve_store_backend(&self, env_value: Option<String>) -> Result<StoreBackend> {
        match env_value.filter(|v| !v.trim().is_empty()) {
            Some(value) => value
                .parse::<StoreBackend>()
                .with_context(|| format!("Invalid {}", STORE_ENV)),
            None => Ok(self.store_backend),
        }
    }

    /// Open the configured session store
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        let store: Arc<dyn KeyValueStore> = match self.store_backend()? {
            StoreBackend::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StoreBackend::Keyring => Arc::new(KeyringStore::new(APP_NAME)),
        };
        Ok(store)
    }
}
