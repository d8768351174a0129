//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "app": { "perPage": 10, "minPasswordLength": 8, "totpIssuer": "CoinbaseTracker" },
//!   "coinbase": { "baseUrl": "https://api.coinbase.com", "apiVersion": "2024-01-01" }
//! }
//! ```
//! Unknown keys are preserved when saving.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "COINLEDGER_DIR";

/// Environment variable overriding the Coinbase API base URL
pub const COINBASE_URL_ENV: &str = "COINLEDGER_COINBASE_URL";

/// Environment variable holding the base64 credential encryption key
pub const SECRET_KEY_ENV: &str = "COINLEDGER_SECRET_KEY";

pub const COINBASE_PRODUCTION_URL: &str = "https://api.coinbase.com";
const DEFAULT_API_VERSION: &str = "2024-01-01";
const DEFAULT_PER_PAGE: u32 = 10;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_TOTP_ISSUER: &str = "CoinbaseTracker";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    app: AppSettings,
    #[serde(default)]
    coinbase: CoinbaseSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_password_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    totp_issuer: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinbaseSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
}

/// Resolved configuration (settings file + environment overrides)
#[derive(Debug, Clone)]
pub struct Config {
    pub per_page: u32,
    pub min_password_length: usize,
    pub totp_issuer: String,
    pub coinbase_base_url: String,
    pub coinbase_api_version: String,
    /// Base64 credential key from the environment, if set
    pub secret_key: Option<String>,
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            coinbase_base_url: COINBASE_PRODUCTION_URL.to_string(),
            coinbase_api_version: DEFAULT_API_VERSION.to_string(),
            secret_key: None,
            _raw_settings: SettingsFile::default(),
        }
    }
}

impl Config {
    /// Load config from the data directory
    ///
    /// A missing or unreadable settings.json yields defaults. The Coinbase
    /// URL and the credential key can be overridden with environment
    /// variables (used by tests and staging setups).
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            SettingsFile::default()
        };

        let defaults = Self::default();

        let coinbase_base_url = std::env::var(COINBASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| raw.coinbase.base_url.clone())
            .unwrap_or(defaults.coinbase_base_url);

        let secret_key = std::env::var(SECRET_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            per_page: raw.app.per_page.filter(|p| *p > 0).unwrap_or(defaults.per_page),
            min_password_length: raw
                .app
                .min_password_length
                .unwrap_or(defaults.min_password_length),
            totp_issuer: raw
                .app
                .totp_issuer
                .clone()
                .unwrap_or(defaults.totp_issuer),
            coinbase_base_url,
            coinbase_api_version: raw
                .coinbase
                .api_version
                .clone()
                .unwrap_or(defaults.coinbase_api_version),
            secret_key,
            _raw_settings: raw,
        })
    }

    /// Save config to the data directory
    /// Preserves other settings that the CLI doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join("settings.json");

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            SettingsFile::default()
        };

        settings.app.per_page = Some(self.per_page);
        settings.app.min_password_length = Some(self.min_password_length);
        settings.app.totp_issuer = Some(self.totp_issuer.clone());
        settings.coinbase.api_version = Some(self.coinbase_api_version.clone());
        // Env overrides are not persisted
        if std::env::var(COINBASE_URL_ENV).is_err() {
            settings.coinbase.base_url = Some(self.coinbase_base_url.clone());
        }

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}
