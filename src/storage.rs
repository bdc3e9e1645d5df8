//! Secret storage for the counter using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Only secrets live here; everything
//! else is in the JSON config file.

use keyring::Entry;
use tracing::{info, warn};

use crate::error::{PosError, Result};

const SERVICE_NAME: &str = "retail-pos";

// Credential keys
pub const KEY_API_URL: &str = "api_url";
pub const KEY_API_TOKEN: &str = "api_token";
pub const KEY_BANK_FEED_TOKEN: &str = "bank_feed_token";
pub const KEY_TTS_API_KEY: &str = "tts_api_key";

const ALL_KEYS: &[&str] = &[
    KEY_API_URL,
    KEY_API_TOKEN,
    KEY_BANK_FEED_TOKEN,
    KEY_TTS_API_KEY,
];

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<()> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| PosError::Credential(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| PosError::Credential(e.to_string()))
}

/// Delete a credential. Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<()> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| PosError::Credential(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(PosError::Credential(e.to_string())),
    }
}

/// Store the backend URL and token from a pairing connection string
/// (plain or base64url JSON carrying `url` and `key`).
pub fn store_pairing(connection_string: &str) -> Result<String> {
    let token = crate::api::extract_token_from_connection_string(connection_string)
        .ok_or_else(|| PosError::validation("Connection string has no key"))?;
    let url = crate::api::extract_url_from_connection_string(connection_string)
        .ok_or_else(|| PosError::validation("Connection string has no url"))?;

    set_credential(KEY_API_TOKEN, token.trim())?;
    set_credential(KEY_API_URL, &url)?;
    info!(api_url = %url, "backend pairing stored");
    Ok(url)
}

/// Delete every stored secret (sign out of the counter).
pub fn clear_credentials() -> Result<()> {
    info!("deleting all stored credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
