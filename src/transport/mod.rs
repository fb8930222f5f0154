// ABOUTME: Command execution transport abstraction for one remote host
// Defines the execute/upload/download seam the coordinator is built on

pub mod ssh;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use ssh::{SshOptions, SshTransport};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Remote command could not be run: {0}")]
    CommandFailed(String),

    #[error("Upload failed for {local}: {reason}")]
    UploadFailed { local: String, reason: String },

    #[error("Download failed for {remote}: {reason}")]
    DownloadFailed { remote: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of executing one remote command.
///
/// A nonzero exit code is a valid outcome and is never folded into
/// `TransportError`; errors are reserved for connectivity-level failures.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Transport against a single remote host.
///
/// Implementations must also support the plain shell utilities the
/// coordinator stages with (`mkdir`, `mv`, `rm`, `test`, `sha256sum`),
/// which all go through `execute`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command on the remote host and capture its output.
    async fn execute(&self, argv: &[String]) -> Result<ExecOutput, TransportError>;

    /// Copy a local file to a remote path.
    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// Copy a remote file to a local path.
    async fn download_file(&self, remote: &str, local: &Path) -> Result<(), TransportError>;
}
