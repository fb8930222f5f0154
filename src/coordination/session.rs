// ABOUTME: Session lifecycle management for remote working directories
// Owns creation, file mapping bookkeeping, and guaranteed best-effort teardown

use crate::coordination::error::CoordinationError;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One local-to-remote path correspondence inside a session.
#[derive(Debug, Clone)]
pub struct FileMapping {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: Direction,
    /// Content hash of the local file. Always present for inputs.
    pub content_hash: Option<String>,
    /// True when the remote path was served from the upload cache.
    pub cached: bool,
}

impl FileMapping {
    pub fn input(local_path: PathBuf, remote_path: String, content_hash: String, cached: bool) -> Self {
        Self {
            local_path,
            remote_path,
            direction: Direction::Input,
            content_hash: Some(content_hash),
            cached,
        }
    }

    pub fn output(local_path: PathBuf, remote_path: String) -> Self {
        Self {
            local_path,
            remote_path,
            direction: Direction::Output,
            content_hash: None,
            cached: false,
        }
    }
}

/// One remote working-directory scope for a single coordinated execution.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub remote_base_dir: String,
    /// Kept for stale-session sweeps; not consulted during normal operation.
    pub created_at: DateTime<Utc>,
    file_mappings: Vec<FileMapping>,
}

impl Session {
    pub fn new(id: String, remote_base_dir: String) -> Self {
        Self {
            id,
            remote_base_dir,
            created_at: Utc::now(),
            file_mappings: Vec::new(),
        }
    }

    pub fn inputs_dir(&self) -> String {
        format!("{}/inputs", self.remote_base_dir)
    }

    pub fn outputs_dir(&self) -> String {
        format!("{}/outputs", self.remote_base_dir)
    }

    pub fn work_dir(&self) -> String {
        format!("{}/work", self.remote_base_dir)
    }

    pub fn add_mapping(&mut self, mapping: FileMapping) {
        self.file_mappings.push(mapping);
    }

    pub fn mappings(&self) -> &[FileMapping] {
        &self.file_mappings
    }

    pub fn output_mappings(&self) -> impl Iterator<Item = &FileMapping> {
        self.file_mappings
            .iter()
            .filter(|m| m.direction == Direction::Output)
    }

    /// Remote path for an output argument. Only the file name component is
    /// used, so a crafted output argument can never escape the session's
    /// outputs directory. Distinct locals sharing a basename get a numeric
    /// suffix rather than silently aliasing the same remote file.
    pub fn output_remote_path(&self, local: &Path) -> Result<String, CoordinationError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty() && n.as_str() != "." && n.as_str() != "..")
            .ok_or_else(|| CoordinationError::InvalidOutputPath(local.to_path_buf()))?;

        let dir = self.outputs_dir();
        let mut candidate = format!("{dir}/{name}");
        let mut counter = 1usize;
        while self.output_mappings().any(|m| m.remote_path == candidate) {
            candidate = format!("{dir}/{}", numbered_name(&name, counter));
            counter += 1;
        }
        Ok(candidate)
    }
}

fn numbered_name(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

/// Creates session directories on the remote host and guarantees their
/// removal. Cleanup ownership lives here exclusively; no other component
/// deletes session state.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    sessions_root: String,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, remote_root: &str) -> Self {
        Self {
            transport,
            sessions_root: format!("{remote_root}/sessions"),
        }
    }

    /// Create a fresh session with a collision-free id and its directory
    /// scaffolding (`inputs/`, `outputs/`, `work/`) in a single remote call.
    pub async fn create(&self) -> Result<Session, CoordinationError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("topyaz_{}_{}", Utc::now().timestamp(), &suffix[..8]);
        let remote_base_dir = format!("{}/{}", self.sessions_root, id);

        let session = Session::new(id, remote_base_dir);

        let mkdir = vec![
            "mkdir".to_string(),
            "-p".to_string(),
            session.inputs_dir(),
            session.outputs_dir(),
            session.work_dir(),
        ];
        let output = self.transport.execute(&mkdir).await?;
        if !output.success() {
            return Err(CoordinationError::SessionSetup(format!(
                "mkdir for {} exited {}: {}",
                session.remote_base_dir,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        debug!("Created remote session directory: {}", session.remote_base_dir);
        Ok(session)
    }

    /// Remove the session directory. Best-effort: failures are logged and
    /// swallowed so they never mask the coordination's primary result.
    pub async fn cleanup(&self, session: &Session) {
        debug!("Cleaning up remote session {}", session.id);
        let rm = vec![
            "rm".to_string(),
            "-rf".to_string(),
            session.remote_base_dir.clone(),
        ];
        match self.transport.execute(&rm).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                warn!(
                    "Failed to clean up session {}: rm exited {}: {}",
                    session.id,
                    output.exit_code,
                    output.stderr.trim()
                );
            }
            Err(e) => {
                warn!("Failed to clean up session {}: {}", session.id, e);
            }
        }
    }
}
