//! Server playback challenge (SPC) builders.
//!
//! Building the SPC is a platform capability (FairPlay key session APIs), so
//! the manager only sees the [`ChallengeBuilder`] trait. Implementations run
//! on tokio's blocking pool and may block. A cancelled handshake stops
//! waiting for the builder but does not interrupt it.
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::content::ContentId;
use crate::error::{Error, Result};
use crate::utils::get_binary_path;

/// Produces an opaque challenge from the application certificate and a
/// content identifier.
pub trait ChallengeBuilder: Send + Sync {
    /// Return the challenge bytes, or [`Error::ChallengeBuild`] when the
    /// certificate or identifier is rejected.
    fn build_challenge(&self, content_id: &ContentId, certificate: &[u8]) -> Result<Vec<u8>>;
}

impl<F> ChallengeBuilder for F
where
    F: Fn(&ContentId, &[u8]) -> Result<Vec<u8>> + Send + Sync,
{
    fn build_challenge(&self, content_id: &ContentId, certificate: &[u8]) -> Result<Vec<u8>> {
        self(content_id, certificate)
    }
}

/// Runs an external program to build the challenge.
///
/// The program receives the content identifier as its last argument and the
/// certificate on stdin, and must print the raw challenge on stdout.
#[derive(Clone)]
pub struct ProcessChallengeBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessChallengeBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Resolve a program by name on `PATH`.
    pub fn from_path(name: &str) -> Result<Self> {
        let program = get_binary_path(&[name])
            .ok_or_else(|| Error::Configuration(format!("{} executable not found", name)))?;
        Ok(Self::new(program))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Debug for ProcessChallengeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessChallengeBuilder")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish()
    }
}

impl ChallengeBuilder for ProcessChallengeBuilder {
    fn build_challenge(&self, content_id: &ContentId, certificate: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(content_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ChallengeBuild(format!("Failed to run {}: {}", self.program.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(certificate)
                .map_err(|e| Error::ChallengeBuild(format!("Failed to pass certificate: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::ChallengeBuild(format!("Challenge program failed: {}", e)))?;

        if !output.status.success() {
            return Err(Error::ChallengeBuild(format!(
                "Challenge program exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::ChallengeBuild(
                "Challenge program produced no output".to_string(),
            ));
        }
        Ok(output.stdout)
    }
}
