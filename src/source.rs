//! Certificate and license endpoint locators.
use std::fmt;

use url::Url;

use crate::content::ContentId;
use crate::error::{Error, Result};

fn parse_locator(which: &str, value: &str) -> Result<Url> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Configuration(format!("{} locator is empty", which)));
    }
    let url = Url::parse(value)
        .map_err(|e| Error::Configuration(format!("{} locator {:?}: {}", which, value, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Configuration(format!(
            "{} locator {:?} must use http or https",
            which, value
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Configuration(format!(
            "{} locator {:?} has no host",
            which, value
        )));
    }
    Ok(url)
}

/// Location of the DRM application certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSource(Url);

impl CertificateSource {
    pub fn parse(value: &str) -> Result<Self> {
        parse_locator("Certificate", value).map(Self)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for CertificateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// License issuance endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseSource(Url);

impl LicenseSource {
    pub fn parse(value: &str) -> Result<Self> {
        parse_locator("License", value).map(Self)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Endpoint for one content identifier.
    ///
    /// With `append_content_id` the identifier becomes the last path segment,
    /// replacing an empty trailing segment (`.../licenses/` + `id`).
    pub fn endpoint_for(&self, content_id: &ContentId, append_content_id: bool) -> Url {
        let mut url = self.0.clone();
        if append_content_id {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().push(content_id.as_str());
            }
        }
        url
    }
}

impl fmt::Display for LicenseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
