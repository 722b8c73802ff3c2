//! W3C ClearKey license parsing.
use base64::Engine;
use serde::Deserialize;

use crate::content::ContentId;
use crate::error::{Error, Result};

/// One entry of a ClearKey license.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearKeyEntry {
    #[serde(default = "default_kty")]
    pub kty: String,
    /// Base64url key id.
    pub kid: String,
    /// Base64url key.
    pub k: String,
}

fn default_kty() -> String {
    "oct".to_string()
}

/// `{"keys": [...], "type": "temporary"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearKeyLicense {
    pub keys: Vec<ClearKeyEntry>,
    #[serde(default, rename = "type")]
    pub session_type: Option<String>,
}

fn decode_b64url(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim().trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| Error::LicenseParse(format!("Invalid ClearKey base64url: {}", e)))
}

impl ClearKeyLicense {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::LicenseParse(format!("Invalid ClearKey license: {}", e)))
    }

    /// Key for a content identifier.
    ///
    /// A `kid` matches when it equals the identifier or its base64url
    /// encoding. A license with a single key serves any identifier.
    pub fn key_for(&self, content_id: &ContentId) -> Result<Vec<u8>> {
        let keys: Vec<&ClearKeyEntry> = self
            .keys
            .iter()
            .filter(|entry| entry.kty == "oct")
            .collect();

        let encoded =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(content_id.as_bytes());
        let entry = keys
            .iter()
            .find(|entry| {
                let kid = entry.kid.trim_end_matches('=');
                kid == content_id.as_str() || kid == encoded
            })
            .or(match keys.as_slice() {
                [only] => Some(only),
                _ => None,
            })
            .ok_or_else(|| {
                Error::LicenseParse(format!("No ClearKey entry for content {}", content_id))
            })?;

        decode_b64url(&entry.k)
    }
}
