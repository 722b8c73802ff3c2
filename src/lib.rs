//! rsfairplay - FairPlay-style DRM license session manager.
//!
//! This crate provides:
//! - A license session that resolves content key requests with a
//!   certificate + license handshake over HTTP.
//! - A session-wide application certificate cache with coalesced fetches.
//! - Per content identifier coalescing and cancellation of handshakes.
//! - License envelope parsing (raw CKC, `<ckc>` tag, JSON, protobuf,
//!   ClearKey).
//!
//! The server playback challenge itself is produced by an injected
//! [`challenge::ChallengeBuilder`], normally backed by the platform's
//! FairPlay key session APIs.
//!
//! Feature flags:
//! - `cli`: enable the CLI binary.
//! - `chrono`: print lease expiry times in the CLI.
#![allow(clippy::result_large_err)]

/// Application certificate cache.
pub mod certificate;
/// Challenge builder capability.
pub mod challenge;
/// ClearKey license parsing.
pub mod clearkey;
/// Session configuration.
pub mod config;
/// Content identifiers and key URIs.
pub mod content;
/// Common error types and Result alias.
pub mod error;
/// Decryption key responses and license formats.
pub mod key;
/// License session manager.
pub mod manager;
/// Key request lifecycle.
pub mod session;
/// Certificate and license locators.
pub mod source;
/// HTTP transport.
pub mod transport;
/// Shared helper utilities.
pub mod utils;

pub use challenge::ChallengeBuilder;
pub use config::SessionConfig;
pub use content::ContentId;
pub use error::{Error, FetchError, Result};
pub use key::{DecryptionKeyResponse, LicenseFormat};
pub use manager::LicenseSessionManager;
