//! Key request records and their lifecycle.
//!
//! Each request moves strictly forward through
//! `Created -> CertificateResolving -> ChallengeBuilding -> LicenseFetching
//! -> Parsing -> Fulfilled`, and may drop to `Failed` from any non-terminal
//! state.
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::content::ContentId;
use crate::error::FailureKind;

/// Lifecycle state of a key request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRequestState {
    Created,
    CertificateResolving,
    ChallengeBuilding,
    LicenseFetching,
    Parsing,
    Fulfilled,
    Failed(FailureKind),
}

impl KeyRequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Failed(_))
    }

    fn successor(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::CertificateResolving),
            Self::CertificateResolving => Some(Self::ChallengeBuilding),
            Self::ChallengeBuilding => Some(Self::LicenseFetching),
            Self::LicenseFetching => Some(Self::Parsing),
            Self::Parsing => Some(Self::Fulfilled),
            Self::Fulfilled | Self::Failed(_) => None,
        }
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(self, next: Self) -> bool {
        match next {
            Self::Failed(_) => !self.is_terminal(),
            next => self.successor() == Some(next),
        }
    }
}

impl fmt::Display for KeyRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({:?})", kind),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// One pending request for decryption keys.
///
/// The state is shared with the session so it can be observed while the
/// handshake runs.
#[derive(Debug)]
pub struct KeyRequest {
    /// Unique request identifier (random v4 UUID).
    pub id: Uuid,
    pub content_id: ContentId,
    state: Arc<Mutex<KeyRequestState>>,
}

impl KeyRequest {
    pub fn new(content_id: ContentId) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id,
            state: Arc::new(Mutex::new(KeyRequestState::Created)),
        }
    }

    pub fn state(&self) -> KeyRequestState {
        *self.state.lock()
    }

    pub(crate) fn state_handle(&self) -> Arc<Mutex<KeyRequestState>> {
        Arc::clone(&self.state)
    }

    /// Move to `next`. Illegal transitions are ignored and reported as `false`.
    pub fn advance(&self, next: KeyRequestState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            tracing::warn!(
                request = %self.id,
                content = %self.content_id,
                "Ignoring transition {} -> {}",
                *state,
                next
            );
            return false;
        }
        tracing::debug!(request = %self.id, content = %self.content_id, "{} -> {}", *state, next);
        *state = next;
        true
    }
}
