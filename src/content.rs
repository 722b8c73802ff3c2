//! Content identifiers and `skd://` key URI parsing.
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// URI scheme of FairPlay content-key requests.
pub const SKD_SCHEME: &str = "skd";

/// Identifier of one protected content key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extract the identifier from an `skd://` key URI.
    ///
    /// `skd://track-42` yields `track-42`. When the remainder holds
    /// `;`-separated fields the last one is the asset id, so
    /// `skd://ezdrm;3c8e0e02-1e1d-4ea9` yields `3c8e0e02-1e1d-4ea9`.
    pub fn from_key_uri(uri: &str) -> Result<Self> {
        let invalid = || Error::InvalidKeyUri(uri.to_string());

        let (scheme, rest) = uri.trim().split_once("://").ok_or_else(invalid)?;
        if !scheme.eq_ignore_ascii_case(SKD_SCHEME) {
            return Err(invalid());
        }
        let id = rest.rsplit(';').next().unwrap_or(rest).trim_end_matches('/');
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Accepts either an `skd://` URI or a bare identifier.
impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains("://") {
            Self::from_key_uri(s)
        } else if s.trim().is_empty() {
            Err(Error::InvalidKeyUri(s.to_string()))
        } else {
            Ok(Self::new(s.trim()))
        }
    }
}
