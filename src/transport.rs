//! HTTP transport for the certificate and license endpoints.
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use url::Url;

use crate::config::{CertificateMethod, SessionConfig};
use crate::error::{Error, FetchError, Result};
use crate::source::CertificateSource;

/// `Content-Type` of challenge submissions.
pub const CHALLENGE_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared HTTP client with the session's timeout and license headers.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    timeout: Duration,
    certificate_method: CertificateMethod,
    license_headers: HeaderMap,
}

impl Transport {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let mut license_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::Configuration(format!("Invalid header name {:?}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::Configuration(format!("Invalid value for header {}: {}", name, e))
            })?;
            license_headers.insert(name, value);
        }

        Ok(Self {
            client,
            timeout: config.timeout(),
            certificate_method: config.certificate_method,
            license_headers,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch the application certificate.
    pub async fn fetch_certificate(&self, source: &CertificateSource) -> Result<Bytes> {
        let request = match self.certificate_method {
            CertificateMethod::Get => self.client.get(source.url().clone()),
            CertificateMethod::Post => self.client.post(source.url().clone()),
        };
        self.send(request).await.map_err(Error::CertificateFetch)
    }

    /// Submit a challenge and return the raw license response.
    pub async fn fetch_license(&self, endpoint: Url, challenge: Vec<u8>) -> Result<Bytes> {
        let request = self
            .client
            .post(endpoint)
            .headers(self.license_headers.clone())
            .header(CONTENT_TYPE, CHALLENGE_CONTENT_TYPE)
            .body(challenge);
        self.send(request).await.map_err(Error::LicenseFetch)
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Bytes, FetchError> {
        with_timeout(self.timeout, async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!("Error body: {body}");
                return Err(FetchError::Status { status, body });
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Err(FetchError::EmptyBody);
            }
            Ok(bytes)
        })
        .await
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> std::result::Result<T, FetchError>
where
    F: Future<Output = std::result::Result<T, FetchError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}
