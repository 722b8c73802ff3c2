//! Session configuration.
//!
//! A `SessionConfig` can be built in code or loaded from YAML:
//!
//! ```yaml
//! certificate_url: https://fps.ezdrm.com/demo/video/eleisure.cer
//! license_url: https://fps.ezdrm.com/api/licenses/
//! append_content_id: true
//! license_format: raw
//! timeout_ms: 5000
//! headers:
//!   X-Custom-Data: token
//! ```
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::LicenseFormat;

/// Default timeout for each network stage.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Default `User-Agent` sent to both endpoints.
pub const DEFAULT_USER_AGENT: &str = "rsfairplay";

/// HTTP method used for the certificate endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateMethod {
    #[default]
    Get,
    Post,
}

/// Configuration of a license session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the application certificate is fetched from.
    pub certificate_url: String,
    /// License issuance endpoint.
    pub license_url: String,
    #[serde(default)]
    pub certificate_method: CertificateMethod,
    #[serde(default)]
    pub license_format: LicenseFormat,
    /// Append the content identifier to the license URL path.
    #[serde(default)]
    pub append_content_id: bool,
    /// Per-stage network timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra headers sent with license requests.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl SessionConfig {
    pub fn new(certificate_url: impl Into<String>, license_url: impl Into<String>) -> Self {
        Self {
            certificate_url: certificate_url.into(),
            license_url: license_url.into(),
            certificate_method: CertificateMethod::default(),
            license_format: LicenseFormat::default(),
            append_content_id: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            headers: BTreeMap::new(),
            user_agent: default_user_agent(),
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("Invalid session config: {}", e)))
    }

    /// Load a YAML config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_license_format(mut self, format: LicenseFormat) -> Self {
        self.license_format = format;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_append_content_id(mut self, append: bool) -> Self {
        self.append_content_id = append;
        self
    }

    pub fn with_certificate_method(mut self, method: CertificateMethod) -> Self {
        self.certificate_method = method;
        self
    }
}
