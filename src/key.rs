//! Decryption key responses and license envelope parsing.
//!
//! License servers wrap the content key context (CKC) in different ways; the
//! session is configured with one [`LicenseFormat`] and every response is
//! parsed with it.
use std::fmt;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::clearkey::ClearKeyLicense;
use crate::content::ContentId;
use crate::error::{Error, Result};

/// Key material handed back to the media pipeline.
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptionKeyResponse {
    /// CKC (or content key for ClearKey) bytes.
    pub key: Bytes,
    /// How long the key may be used before renewal.
    pub lease: Option<Duration>,
}

impl DecryptionKeyResponse {
    pub fn new(key: impl Into<Bytes>, lease: Option<Duration>) -> Self {
        Self {
            key: key.into(),
            lease: lease.filter(|d| !d.is_zero()),
        }
    }
}

// Keys stay out of logs.
impl fmt::Debug for DecryptionKeyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKeyResponse")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("lease", &self.lease)
            .finish()
    }
}

/// Envelope of license responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseFormat {
    /// The body is the CKC itself.
    #[default]
    Raw,
    /// `<ckc>BASE64</ckc>`.
    CkcTag,
    /// `{"ckc": "<base64>", "lease": <seconds>}`.
    Json,
    /// Protobuf [`LicenseEnvelope`].
    Protobuf,
    /// W3C ClearKey JSON license.
    ClearKey,
}

impl LicenseFormat {
    /// Parse a license response body.
    pub fn parse(self, body: &[u8], content_id: &ContentId) -> Result<DecryptionKeyResponse> {
        let response = match self {
            LicenseFormat::Raw => DecryptionKeyResponse::new(Bytes::copy_from_slice(body), None),
            LicenseFormat::CkcTag => parse_ckc_tag(body)?,
            LicenseFormat::Json => parse_json(body)?,
            LicenseFormat::Protobuf => parse_protobuf(body)?,
            LicenseFormat::ClearKey => {
                let key = ClearKeyLicense::from_slice(body)?.key_for(content_id)?;
                DecryptionKeyResponse::new(key, None)
            }
        };
        if response.key.is_empty() {
            return Err(Error::LicenseParse("License carries an empty key".to_string()));
        }
        Ok(response)
    }
}

impl std::str::FromStr for LicenseFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "raw" => Ok(Self::Raw),
            "ckc_tag" | "ckc" => Ok(Self::CkcTag),
            "json" => Ok(Self::Json),
            "protobuf" | "proto" => Ok(Self::Protobuf),
            "clear_key" | "clearkey" => Ok(Self::ClearKey),
            other => Err(Error::Configuration(format!("Unknown license format: {}", other))),
        }
    }
}

/// Protobuf renewal envelope.
#[derive(Clone, PartialEq, Message)]
pub struct LicenseEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub ckc: Vec<u8>,
    #[prost(uint64, optional, tag = "2")]
    pub lease_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    ckc: String,
    #[serde(default)]
    lease: Option<u64>,
}

fn decode_b64(value: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| Error::LicenseParse(format!("Invalid base64 CKC: {}", e)))
}

fn parse_ckc_tag(body: &[u8]) -> Result<DecryptionKeyResponse> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::LicenseParse("CKC response is not text".to_string()))?
        .trim();
    let inner = text
        .strip_prefix("<ckc>")
        .and_then(|rest| rest.strip_suffix("</ckc>"))
        .ok_or_else(|| Error::LicenseParse("Missing <ckc> element".to_string()))?;
    Ok(DecryptionKeyResponse::new(decode_b64(inner)?, None))
}

fn parse_json(body: &[u8]) -> Result<DecryptionKeyResponse> {
    let envelope: JsonEnvelope = serde_json::from_slice(body)
        .map_err(|e| Error::LicenseParse(format!("Invalid JSON envelope: {}", e)))?;
    Ok(DecryptionKeyResponse::new(
        decode_b64(&envelope.ckc)?,
        envelope.lease.map(Duration::from_secs),
    ))
}

fn parse_protobuf(body: &[u8]) -> Result<DecryptionKeyResponse> {
    let envelope = LicenseEnvelope::decode(body)
        .map_err(|e| Error::LicenseParse(format!("Invalid protobuf envelope: {}", e)))?;
    Ok(DecryptionKeyResponse::new(
        envelope.ckc,
        envelope.lease_seconds.map(Duration::from_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ContentId {
        ContentId::new("track-42")
    }

    #[test]
    fn raw_body_is_the_key() {
        let response = LicenseFormat::Raw.parse(b"\x01\x02\x03", &id()).unwrap();
        assert_eq!(response.key.as_ref(), b"\x01\x02\x03");
        assert_eq!(response.lease, None);
    }

    #[test]
    fn json_envelope_with_lease() {
        let body = br#"{"ckc":"AAECAw==","lease":3600}"#;
        let response = LicenseFormat::Json.parse(body, &id()).unwrap();
        assert_eq!(response.key.as_ref(), &[0, 1, 2, 3]);
        assert_eq!(response.lease, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn zero_lease_is_absent() {
        let body = br#"{"ckc":"AAECAw==","lease":0}"#;
        let response = LicenseFormat::Json.parse(body, &id()).unwrap();
        assert_eq!(response.lease, None);
    }

    #[test]
    fn ckc_tag_tolerates_whitespace() {
        let body = b"\n  <ckc>AAECAw==</ckc>\n";
        let response = LicenseFormat::CkcTag.parse(body, &id()).unwrap();
        assert_eq!(response.key.as_ref(), &[0, 1, 2, 3]);
    }

    #[test]
    fn protobuf_envelope() {
        let body = LicenseEnvelope {
            ckc: b"ckc-bytes".to_vec(),
            lease_seconds: Some(60),
        }
        .encode_to_vec();
        let response = LicenseFormat::Protobuf.parse(&body, &id()).unwrap();
        assert_eq!(response.key.as_ref(), b"ckc-bytes");
        assert_eq!(response.lease, Some(Duration::from_secs(60)));
    }

    #[test]
    fn mismatched_envelopes_are_parse_errors() {
        let cases: [(LicenseFormat, &[u8]); 5] = [
            (LicenseFormat::Json, b"<ckc>AAEC</ckc>"),
            (LicenseFormat::Json, br#"{"ckc":"not base64!"}"#),
            (LicenseFormat::CkcTag, br#"{"ckc":"AAEC"}"#),
            (LicenseFormat::Protobuf, b"\xff\xff\xff"),
            (LicenseFormat::Json, br#"{"ckc":""}"#),
        ];
        for (format, body) in cases {
            let err = format.parse(body, &id()).unwrap_err();
            assert!(matches!(err, Error::LicenseParse(_)), "{format:?}: {err}");
        }
    }

    #[test]
    fn format_names() {
        assert_eq!("ckc-tag".parse::<LicenseFormat>().unwrap(), LicenseFormat::CkcTag);
        assert_eq!("ClearKey".parse::<LicenseFormat>().unwrap(), LicenseFormat::ClearKey);
        assert!("xml".parse::<LicenseFormat>().is_err());
    }

    #[test]
    fn debug_hides_key() {
        let response = DecryptionKeyResponse::new(&b"secret"[..], None);
        assert!(!format!("{response:?}").contains("secret"));
    }
}
