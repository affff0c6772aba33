//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: which
//! backend to talk to, where tokens are kept, and the last email used to log in.
//!
//! Configuration is stored at `~/.config/shopdesk/config.json`. A few values
//! can be overridden from the environment (see `Config::apply_env`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{DEFAULT_API_URL, DEFAULT_LOGIN_PATH};
use crate::auth::{CookieFileStore, EncryptedFileStore, KeyringStore, MemoryStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shopdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Token files inside the data directory
const COOKIE_FILE: &str = "cookies.txt";
const ENCRYPTED_FILE: &str = "tokens.enc";

pub const ENV_API_URL: &str = "SHOPDESK_API_URL";
pub const ENV_TOKEN_STORE: &str = "SHOPDESK_TOKEN_STORE";
pub const ENV_PASSPHRASE: &str = "SHOPDESK_PASSPHRASE";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where access/refresh tokens are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenStoreKind {
    Keyring,
    #[default]
    CookieFile,
    EncryptedFile,
    Memory,
}

impl fmt::Display for TokenStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenStoreKind::Keyring => "keyring",
            TokenStoreKind::CookieFile => "cookie-file",
            TokenStoreKind::EncryptedFile => "encrypted-file",
            TokenStoreKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

impl FromStr for TokenStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(TokenStoreKind::Keyring),
            "cookie-file" | "cookies" => Ok(TokenStoreKind::CookieFile),
            "encrypted-file" | "encrypted" => Ok(TokenStoreKind::EncryptedFile),
            "memory" => Ok(TokenStoreKind::Memory),
            other => Err(anyhow::anyhow!(
                "Unknown token store '{}' (expected keyring, cookie-file, encrypted-file or memory)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub login_path: String,
    pub token_store: TokenStoreKind,
    pub request_timeout_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            token_store: TokenStoreKind::default(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            last_email: None,
        }
    }
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

    /// Apply environment overrides on top of the file values
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var(ENV_API_URL).ok(),
            std::env::var(ENV_TOKEN_STORE).ok(),
        )
    }

    fn apply_overrides(&mut self, api_url: Option<String>, token_store: Option<String>) -> Result<()> {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(kind) = token_store.filter(|k| !k.trim().is_empty()) {
            self.token_store = kind
                .parse()
                .with_context(|| format!("Invalid {}", ENV_TOKEN_STORE))?;
        }
        self.validate()
    }

    /// The API URL must be an absolute http(s) URL and the timeout non-zero
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.api_url)
            .with_context(|| format!("Invalid API URL: {}", self.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("API URL must use http or https: {}", self.api_url);
        }
        if !self.login_path.starts_with('/') {
            anyhow::bail!("Login path must start with '/': {}", self.login_path);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for token files
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Directory for log files
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Build the configured token store. The encrypted store needs a
    /// passphrase, taken from `SHOPDESK_PASSPHRASE` unless given.
    pub fn open_token_store(&self, passphrase: Option<String>) -> Result<Arc<dyn TokenStore>> {
        let store: Arc<dyn TokenStore> = match self.token_store {
            TokenStoreKind::Keyring => Arc::new(KeyringStore::new()),
            TokenStoreKind::CookieFile => {
                Arc::new(CookieFileStore::new(self.data_dir()?.join(COOKIE_FILE)))
            }
            TokenStoreKind::EncryptedFile => {
                let passphrase = passphrase
                    .or_else(|| std::env::var(ENV_PASSPHRASE).ok())
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        anyhow::anyhow!("The encrypted token store needs {} to be set", ENV_PASSPHRASE)
                    })?;
                Arc::new(EncryptedFileStore::new(
                    self.data_dir()?.join(ENCRYPTED_FILE),
                    passphrase,
                ))
            }
            TokenStoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
