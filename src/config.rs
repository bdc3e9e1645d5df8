//! Counter configuration.
//!
//! Layers, lowest priority first: built-in defaults, the JSON config file,
//! `RETAIL_POS_*` environment variables, and finally the OS keyring for any
//! secret still missing.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::api::{
    extract_token_from_connection_string, extract_url_from_connection_string, normalize_base_url,
};
use crate::error::{PosError, Result};
use crate::storage;

/// Interval between bank feed lookups while a transfer QR is displayed.
pub const PAYMENT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Overall lifetime of a transfer QR before it is reported expired.
pub const PAYMENT_TIMEOUT: Duration = Duration::from_secs(300);
/// Quiet period after the last keystroke before a search is sent.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(400);
/// How long an identical search is served from cache.
pub const SEARCH_CACHE_TTL: Duration = Duration::from_secs(30);
pub const SEARCH_CACHE_CAPACITY: u64 = 512;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

const ENV_CONFIG_PATH: &str = "RETAIL_POS_CONFIG";
const ENV_API_URL: &str = "RETAIL_POS_API_URL";
const ENV_API_TOKEN: &str = "RETAIL_POS_API_TOKEN";
const ENV_BANK_FEED_TOKEN: &str = "RETAIL_POS_BANK_FEED_TOKEN";
const ENV_TTS_KEY: &str = "RETAIL_POS_TTS_KEY";

/// A secret string wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_empty() { "<empty>" } else { "<redacted>" })
    }
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    /// Pairing string handed out by the back office.
    pub connection_string: Option<String>,
    pub bank: BankAccountConfig,
    pub bank_feed: BankFeedFile,
    pub voice: Option<VoiceFile>,
    pub reference_prefix: Option<String>,
    pub search_page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BankFeedFile {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceFile {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub voice: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Receiving bank account rendered into the VietQR image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BankAccountConfig {
    pub bank_id: String,
    pub account_no: String,
    pub account_name: String,
    pub template: String,
}

impl Default for BankAccountConfig {
    fn default() -> Self {
        BankAccountConfig {
            bank_id: String::new(),
            account_no: String::new(),
            account_name: String::new(),
            template: "compact2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BankFeedConfig {
    pub url: String,
    pub token: Secret,
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub url: String,
    pub api_key: Secret,
    pub voice: String,
}

#[derive(Debug, Clone)]
pub struct PosConfig {
    pub api_url: String,
    pub api_token: Secret,
    pub bank: BankAccountConfig,
    pub bank_feed: BankFeedConfig,
    pub voice: Option<VoiceConfig>,
    pub reference_prefix: String,
    pub search_page_size: u32,
}

impl PosConfig {
    /// Load from the config file, environment and OS keyring.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| PosError::Config(format!("read {}: {e}", path.display())))?;
            serde_json::from_str::<ConfigFile>(&raw)
                .map_err(|e| PosError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            debug!(path = %path.display(), "no config file, using environment only");
            ConfigFile::default()
        };
        let config = Self::resolve(file, |k| std::env::var(k).ok(), storage::get_credential)?;
        info!(api_url = %config.api_url, bank = %config.bank.bank_id, "configuration loaded");
        Ok(config)
    }

    /// Merge a parsed file with environment and keyring lookups.
    pub fn resolve(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        keyring: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let pairing = file.connection_string.as_deref();

        let api_url = non_empty(env(ENV_API_URL))
            .or_else(|| non_empty(file.api_url.clone()))
            .or_else(|| pairing.and_then(extract_url_from_connection_string))
            .or_else(|| non_empty(keyring(storage::KEY_API_URL)))
            .map(|u| normalize_base_url(&u))
            .ok_or_else(|| PosError::Config("apiUrl is required".into()))?;

        let api_token = non_empty(env(ENV_API_TOKEN))
            .or_else(|| non_empty(file.api_token.clone()))
            .or_else(|| pairing.and_then(extract_token_from_connection_string))
            .or_else(|| non_empty(keyring(storage::KEY_API_TOKEN)))
            .unwrap_or_default();

        if file.bank.bank_id.trim().is_empty() || file.bank.account_no.trim().is_empty() {
            return Err(PosError::Config(
                "bank.bankId and bank.accountNo are required".into(),
            ));
        }

        let bank_feed = BankFeedConfig {
            url: non_empty(file.bank_feed.url.clone()).unwrap_or_default(),
            token: Secret::new(
                non_empty(env(ENV_BANK_FEED_TOKEN))
                    .or_else(|| non_empty(file.bank_feed.token.clone()))
                    .or_else(|| non_empty(keyring(storage::KEY_BANK_FEED_TOKEN)))
                    .unwrap_or_default(),
            ),
        };

        let voice = match file.voice {
            Some(v) => match non_empty(v.url) {
                Some(url) => Some(VoiceConfig {
                    url,
                    api_key: Secret::new(
                        non_empty(env(ENV_TTS_KEY))
                            .or_else(|| non_empty(v.api_key))
                            .or_else(|| non_empty(keyring(storage::KEY_TTS_API_KEY)))
                            .unwrap_or_default(),
                    ),
                    voice: non_empty(v.voice).unwrap_or_else(|| "banmai".to_string()),
                }),
                None => None,
            },
            None => None,
        };

        let mut bank = file.bank;
        if bank.template.trim().is_empty() {
            bank.template = BankAccountConfig::default().template;
        }

        Ok(PosConfig {
            api_url,
            api_token: Secret::new(api_token),
            bank,
            bank_feed,
            voice,
            reference_prefix: non_empty(file.reference_prefix)
                .unwrap_or_else(|| "TXN".to_string()),
            search_page_size: file
                .search_page_size
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Per-user application data directory.
pub fn data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("retail-pos")
}

pub fn config_path() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("config.json"))
}
