//! Error types for rsfairplay.
//!
//! Every error is `Clone` so a single handshake outcome can be handed to all
//! coalesced waiters.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for license session operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A locator, header or client setting is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The content-key URI is not an `skd://` URI with an identifier.
    #[error("Invalid key URI {0:?}")]
    InvalidKeyUri(String),

    /// The application certificate could not be fetched.
    #[error("Certificate fetch failed: {0}")]
    CertificateFetch(#[source] FetchError),

    /// The DRM primitive rejected the certificate or content identifier.
    #[error("Challenge build failed: {0}")]
    ChallengeBuild(String),

    /// The license endpoint could not be reached or answered badly.
    #[error("License fetch failed: {0}")]
    LicenseFetch(#[source] FetchError),

    /// The license response did not match the expected envelope.
    #[error("License parse failed: {0}")]
    LicenseParse(String),

    /// The request was cancelled or the session was shut down.
    #[error("Key request cancelled")]
    Cancelled,

    /// The handshake task stopped without producing a result.
    #[error("Handshake task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Whether this error is a timed out network stage.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::CertificateFetch(e) | Error::LicenseFetch(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Short classification used for the `Failed` request state.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Configuration(_) | Error::InvalidKeyUri(_) => FailureKind::Configuration,
            Error::CertificateFetch(_) => FailureKind::CertificateFetch,
            Error::ChallengeBuild(_) => FailureKind::ChallengeBuild,
            Error::LicenseFetch(_) => FailureKind::LicenseFetch,
            Error::LicenseParse(_) => FailureKind::LicenseParse,
            Error::Cancelled => FailureKind::Cancelled,
            Error::TaskFailed(_) => FailureKind::TaskFailed,
        }
    }
}

/// Failure of a single network stage.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The stage did not finish within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The server answered 2xx with no body.
    #[error("empty response body")]
    EmptyBody,

    /// Connection, TLS or body read failure.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(Arc::new(e))
    }
}

/// Classification of a failed key request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Configuration,
    CertificateFetch,
    ChallengeBuild,
    LicenseFetch,
    LicenseParse,
    Cancelled,
    TaskFailed,
}

/// Result type alias for rsfairplay operations.
pub type Result<T> = std::result::Result<T, Error>;
