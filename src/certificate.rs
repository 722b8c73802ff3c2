//! Application certificate cache.
//!
//! The cache is shared by all key requests of a session. The first caller on
//! a cold cache starts the fetch; concurrent callers await the same fetch.
//! Only a successful fetch is stored, so a failure is retried by the next
//! caller.
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::Result;
use crate::source::CertificateSource;
use crate::transport::Transport;

type CertificateFetch = Shared<BoxFuture<'static, Result<Bytes>>>;

#[derive(Default)]
enum Slot {
    #[default]
    Empty,
    Fetching {
        generation: u64,
        fetch: CertificateFetch,
    },
    Ready(Bytes),
}

#[derive(Default)]
struct CacheState {
    slot: Slot,
    generation: u64,
    fetches: u64,
}

/// Certificate cache for one [`CertificateSource`].
#[derive(Clone)]
pub struct CertificateCache {
    source: CertificateSource,
    transport: Transport,
    state: Arc<Mutex<CacheState>>,
}

impl CertificateCache {
    pub fn new(source: CertificateSource, transport: Transport) -> Self {
        Self {
            source,
            transport,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn source(&self) -> &CertificateSource {
        &self.source
    }

    /// Cached certificate, if present.
    pub fn cached(&self) -> Option<Bytes> {
        match &self.state.lock().slot {
            Slot::Ready(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Number of network fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.state.lock().fetches
    }

    /// Return the certificate, fetching it on a cold cache.
    pub async fn get(&self) -> Result<Bytes> {
        let (generation, fetch) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match &state.slot {
                Slot::Ready(bytes) => return Ok(bytes.clone()),
                Slot::Fetching { generation, fetch } => {
                    tracing::trace!("Joining in-flight certificate fetch");
                    (*generation, fetch.clone())
                }
                Slot::Empty => {
                    state.generation += 1;
                    state.fetches += 1;
                    let generation = state.generation;
                    let fetch = self.start_fetch();
                    state.slot = Slot::Fetching {
                        generation,
                        fetch: fetch.clone(),
                    };
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;
        self.settle(generation, &result);
        result
    }

    /// Drop the cached certificate; the next `get` fetches again.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.slot = Slot::Empty;
        tracing::debug!(source = %self.source, "Certificate cache invalidated");
    }

    fn start_fetch(&self) -> CertificateFetch {
        let source = self.source.clone();
        let transport = self.transport.clone();
        async move {
            tracing::debug!(source = %source, "Fetching application certificate");
            transport.fetch_certificate(&source).await
        }
        .boxed()
        .shared()
    }

    // Every waiter of a fetch calls this; only the first one for the current
    // generation changes the slot.
    fn settle(&self, generation: u64, result: &Result<Bytes>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &state.slot {
            Slot::Fetching { generation: g, .. } if *g == generation => {}
            _ => return,
        }
        match result {
            Ok(bytes) => {
                tracing::info!(
                    source = %self.source,
                    "Cached application certificate ({} bytes)",
                    bytes.len()
                );
                state.slot = Slot::Ready(bytes.clone());
            }
            Err(e) => {
                tracing::warn!(source = %self.source, "Certificate fetch failed: {}", e);
                state.slot = Slot::Empty;
            }
        }
    }
}

impl std::fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCache")
            .field("source", &self.source)
            .field("cached", &self.cached().map(|b| b.len()))
            .finish()
    }
}
