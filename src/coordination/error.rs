// ABOUTME: Error types for the remote file coordination core
// Cleanup failures are deliberately absent: they are logged warnings, never errors

use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Upload or download exhausted its retries or failed verification.
    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    /// The remote command exited 0 but produced none of the expected outputs.
    #[error("Remote command produced none of the expected outputs: {0:?}")]
    MissingOutputs(Vec<PathBuf>),

    /// The executable needs an interactive desktop session the remote host
    /// cannot provide. Not retryable.
    #[error("{executable} requires an interactive session on the remote host: {detail}")]
    RequiresInteractiveSession { executable: String, detail: String },

    /// The remote host fails a precondition (e.g. insufficient memory).
    #[error("Remote host unsuitable: {0}")]
    Capability(String),

    /// Session directory scaffolding could not be created.
    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    /// An output argument has no usable file name component.
    #[error("Cannot derive an output name for {0}")]
    InvalidOutputPath(PathBuf),

    /// Connectivity-level failure from the transport collaborator.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
