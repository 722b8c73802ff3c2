//! License session manager.
//!
//! The manager fulfils content key requests for one protected asset with a
//! two step handshake: resolve the application certificate (cached for the
//! session), build a challenge with the injected [`ChallengeBuilder`], submit
//! it to the license endpoint and parse the response.
//!
//! Each handshake runs on its own tokio task. Requests for a content
//! identifier that already has a handshake in flight join that handshake
//! and observe the same result. License responses are never reused: once a
//! handshake finishes, the next request for the identifier starts over.
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::certificate::CertificateCache;
use crate::challenge::ChallengeBuilder;
use crate::config::SessionConfig;
use crate::content::ContentId;
use crate::error::{Error, Result};
use crate::key::DecryptionKeyResponse;
use crate::session::{KeyRequest, KeyRequestState};
use crate::source::{CertificateSource, LicenseSource};
use crate::transport::Transport;

type Handshake = Shared<BoxFuture<'static, Result<DecryptionKeyResponse>>>;

struct InFlight {
    request_id: Uuid,
    state: Arc<Mutex<KeyRequestState>>,
    cancel: CancellationToken,
    handshake: Handshake,
}

struct Inner {
    config: SessionConfig,
    license_source: LicenseSource,
    transport: Transport,
    certificates: CertificateCache,
    challenge_builder: Arc<dyn ChallengeBuilder>,
    in_flight: Mutex<HashMap<ContentId, InFlight>>,
    shutdown: CancellationToken,
}

/// Fulfils decryption key requests for one protected asset.
///
/// Cloning is cheap; clones share the certificate cache and the set of
/// in-flight requests.
#[derive(Clone)]
pub struct LicenseSessionManager {
    inner: Arc<Inner>,
}

impl LicenseSessionManager {
    /// Create a manager with default settings.
    ///
    /// Both locators must be absolute `http`/`https` URLs, otherwise
    /// [`Error::Configuration`] is returned.
    pub fn new<B>(
        certificate_source: &str,
        license_source: &str,
        challenge_builder: B,
    ) -> Result<Self>
    where
        B: ChallengeBuilder + 'static,
    {
        Self::from_config(
            SessionConfig::new(certificate_source, license_source),
            challenge_builder,
        )
    }

    /// Create a manager from a full configuration.
    pub fn from_config<B>(config: SessionConfig, challenge_builder: B) -> Result<Self>
    where
        B: ChallengeBuilder + 'static,
    {
        Self::with_shared_builder(config, Arc::new(challenge_builder))
    }

    /// Create a manager with a challenge builder shared with other sessions.
    pub fn with_shared_builder(
        config: SessionConfig,
        challenge_builder: Arc<dyn ChallengeBuilder>,
    ) -> Result<Self> {
        let certificate_source = CertificateSource::parse(&config.certificate_url)?;
        let license_source = LicenseSource::parse(&config.license_url)?;
        let transport = Transport::new(&config)?;
        let certificates = CertificateCache::new(certificate_source, transport.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                license_source,
                transport,
                certificates,
                challenge_builder,
                in_flight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn certificate_source(&self) -> &CertificateSource {
        self.inner.certificates.source()
    }

    pub fn license_source(&self) -> &LicenseSource {
        &self.inner.license_source
    }

    /// Obtain the decryption key for a content identifier.
    ///
    /// Concurrent calls for the same identifier share one handshake. Dropping
    /// the returned future does not stop the handshake; use [`cancel`] for
    /// that.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, since the handshake is
    /// spawned onto the current runtime.
    ///
    /// [`cancel`]: LicenseSessionManager::cancel
    pub async fn handle_key_request(
        &self,
        content_id: impl Into<ContentId>,
    ) -> Result<DecryptionKeyResponse> {
        let handshake = self.join_or_start(content_id.into())?;
        handshake.await
    }

    /// Like [`handle_key_request`] for an `skd://` key URI.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    ///
    /// [`handle_key_request`]: LicenseSessionManager::handle_key_request
    pub async fn handle_key_uri(&self, uri: &str) -> Result<DecryptionKeyResponse> {
        let content_id = ContentId::from_key_uri(uri)?;
        self.handle_key_request(content_id).await
    }

    /// Resolve the application certificate through the session cache.
    ///
    /// Fails with [`Error::Cancelled`] once the session is shut down.
    pub async fn certificate(&self) -> Result<Bytes> {
        if self.is_shut_down() {
            return Err(Error::Cancelled);
        }
        self.inner.certificates.get().await
    }

    /// Drop the cached certificate so the next request fetches it again.
    pub fn refresh_certificate(&self) {
        self.inner.certificates.invalidate();
    }

    /// Number of certificate fetches issued by this session.
    pub fn certificate_fetches(&self) -> u64 {
        self.inner.certificates.fetch_count()
    }

    /// Cancel the in-flight handshake for `content_id`.
    ///
    /// Every caller waiting on it resolves with [`Error::Cancelled`]. Returns
    /// `false` when nothing was in flight.
    pub fn cancel(&self, content_id: &ContentId) -> bool {
        match self.inner.in_flight.lock().get(content_id) {
            Some(entry) => {
                tracing::debug!(
                    content = %content_id,
                    request = %entry.request_id,
                    "Cancelling key request"
                );
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Tear the session down: cancel all handshakes and drop the certificate.
    ///
    /// Requests made afterwards fail with [`Error::Cancelled`].
    pub fn shutdown(&self) {
        tracing::info!(license = %self.inner.license_source, "Shutting down license session");
        self.inner.shutdown.cancel();
        self.inner.certificates.invalidate();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of handshakes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// State of the in-flight request for `content_id`, if any.
    pub fn request_state(&self, content_id: &ContentId) -> Option<KeyRequestState> {
        self.inner
            .in_flight
            .lock()
            .get(content_id)
            .map(|entry| *entry.state.lock())
    }

    fn join_or_start(&self, content_id: ContentId) -> Result<Handshake> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut in_flight = self.inner.in_flight.lock();
        if let Some(entry) = in_flight.get(&content_id) {
            tracing::trace!(
                content = %content_id,
                request = %entry.request_id,
                "Joining in-flight key request"
            );
            return Ok(entry.handshake.clone());
        }

        let request = KeyRequest::new(content_id.clone());
        let request_id = request.id;
        let state = request.state_handle();
        let cancel = self.inner.shutdown.child_token();

        // The entry is inserted before the lock is released, so the task's
        // cleanup always finds it.
        let task = tokio::spawn(Inner::run(
            Arc::clone(&self.inner),
            request,
            cancel.clone(),
        ));
        let handshake = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Error::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();

        tracing::debug!(content = %content_id, request = %request_id, "Started key request");
        in_flight.insert(
            content_id,
            InFlight {
                request_id,
                state,
                cancel,
                handshake: handshake.clone(),
            },
        );
        Ok(handshake)
    }
}

impl std::fmt::Debug for LicenseSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseSessionManager")
            .field("certificates", &self.inner.certificates)
            .field("license_source", &self.inner.license_source)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Removes the in-flight entry when the handshake task ends, even by panic.
struct InFlightGuard {
    inner: Arc<Inner>,
    content_id: ContentId,
    request_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight
            .get(&self.content_id)
            .is_some_and(|entry| entry.request_id == self.request_id)
        {
            in_flight.remove(&self.content_id);
        }
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        request: KeyRequest,
        cancel: CancellationToken,
    ) -> Result<DecryptionKeyResponse> {
        let _guard = InFlightGuard {
            inner: Arc::clone(&self),
            content_id: request.content_id.clone(),
            request_id: request.id,
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.handshake(&request) => result,
        };

        match &result {
            Ok(response) => {
                request.advance(KeyRequestState::Fulfilled);
                tracing::info!(
                    content = %request.content_id,
                    request = %request.id,
                    "Key request fulfilled ({} byte key, lease {:?})",
                    response.key.len(),
                    response.lease
                );
            }
            Err(e) => {
                request.advance(KeyRequestState::Failed(e.kind()));
                tracing::warn!(
                    content = %request.content_id,
                    request = %request.id,
                    "Key request failed: {}",
                    e
                );
            }
        }
        result
    }

    async fn handshake(&self, request: &KeyRequest) -> Result<DecryptionKeyResponse> {
        request.advance(KeyRequestState::CertificateResolving);
        let certificate = self.certificates.get().await?;

        request.advance(KeyRequestState::ChallengeBuilding);
        // Builders may block.
        let builder = Arc::clone(&self.challenge_builder);
        let content_id = request.content_id.clone();
        let challenge = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            builder.build_challenge(&content_id, &certificate)
        })
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
        .map_err(|e| match e {
            Error::ChallengeBuild(_) => e,
            other => Error::ChallengeBuild(other.to_string()),
        })?;
        if challenge.is_empty() {
            return Err(Error::ChallengeBuild("Challenge builder returned no data".to_string()));
        }

        request.advance(KeyRequestState::LicenseFetching);
        let endpoint = self
            .license_source
            .endpoint_for(&request.content_id, self.config.append_content_id);
        tracing::debug!(content = %request.content_id, "Submitting challenge to {}", endpoint);
        let body = self.transport.fetch_license(endpoint, challenge).await?;

        request.advance(KeyRequestState::Parsing);
        self.config.license_format.parse(&body, &request.content_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(_: &ContentId, cert: &[u8]) -> Result<Vec<u8>> {
        Ok(cert.to_vec())
    }

    #[test]
    fn constructs_with_well_formed_locators() {
        let manager = LicenseSessionManager::new(
            "https://cert.example/app.cer",
            "https://license.example/issue",
            builder,
        )
        .expect("construct");
        assert_eq!(manager.certificate_source().url().as_str(), "https://cert.example/app.cer");
        assert_eq!(manager.license_source().url().as_str(), "https://license.example/issue");
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn malformed_locators_are_configuration_errors() {
        let pairs = [
            ("", "https://license.example/issue"),
            ("https://cert.example/app.cer", ""),
            ("cert.example/app.cer", "https://license.example/issue"),
            ("https://cert.example/app.cer", "skd://license"),
        ];
        for (cert, license) in pairs {
            let err = LicenseSessionManager::new(cert, license, builder).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{cert:?} {license:?}: {err}");
        }
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_cancelled() {
        let manager = LicenseSessionManager::new(
            "https://cert.example/app.cer",
            "https://license.example/issue",
            builder,
        )
        .unwrap();
        manager.shutdown();
        assert!(manager.is_shut_down());
        let err = manager.handle_key_request("track-1").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(manager.certificate_fetches(), 0);
    }

    #[tokio::test]
    async fn certificate_after_shutdown_is_cancelled() {
        let manager = LicenseSessionManager::new(
            "https://cert.example/app.cer",
            "https://license.example/issue",
            builder,
        )
        .unwrap();
        manager.shutdown();
        let err = manager.certificate().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(manager.certificate_fetches(), 0);
    }

    #[test]
    #[should_panic]
    fn key_request_outside_a_runtime_panics() {
        let manager = LicenseSessionManager::new(
            "https://cert.example/app.cer",
            "https://license.example/issue",
            builder,
        )
        .unwrap();
        let _ = futures::executor::block_on(manager.handle_key_request("track-1"));
    }

    #[tokio::test]
    async fn invalid_key_uri_never_starts_a_request() {
        let manager = LicenseSessionManager::new(
            "https://cert.example/app.cer",
            "https://license.example/issue",
            builder,
        )
        .unwrap();
        let err = manager.handle_key_uri("https://track-1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidKeyUri(_)));
        assert_eq!(manager.in_flight(), 0);
    }
}
