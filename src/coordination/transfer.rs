// ABOUTME: Verified, atomic file transfer between local and remote filesystems
// Uploads stage through a temp sibling, are digest-checked, then renamed into place

use crate::config::TransferConfig;
use crate::coordination::cache::{content_hash, ContentCache};
use crate::coordination::error::CoordinationError;
use crate::coordination::session::{FileMapping, Session};
use crate::transport::Transport;
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of fetching one declared output.
#[derive(Debug)]
pub enum OutputFetch {
    /// Local paths that now hold remote bytes. A directory output yields
    /// one entry per file found inside it.
    Downloaded(Vec<PathBuf>),
    /// The remote path does not exist. Distinct from a transfer failure:
    /// the remote command simply never produced this output.
    Missing,
}

/// Moves bytes across the transport with integrity guarantees and consults
/// the content cache to skip redundant uploads.
pub struct FileTransferManager {
    transport: Arc<dyn Transport>,
    cache: ContentCache,
    config: TransferConfig,
}

impl FileTransferManager {
    pub fn new(transport: Arc<dyn Transport>, remote_root: &str, config: TransferConfig) -> Self {
        let cache = ContentCache::new(transport.clone(), remote_root);
        Self {
            transport,
            cache,
            config,
        }
    }

    /// Stage every input for a session, concurrently up to the configured
    /// pool size. All uploads complete before this returns; any failure
    /// aborts the whole staging phase.
    pub async fn upload_inputs(
        &self,
        session: &mut Session,
        inputs: &[PathBuf],
    ) -> Result<(), CoordinationError> {
        let mut staged = stream::iter(inputs.iter().cloned().map(|local| self.stage_input(local)))
            .buffer_unordered(self.config.max_concurrent_uploads.max(1));

        let mut mappings = Vec::with_capacity(inputs.len());
        while let Some(result) = staged.next().await {
            mappings.push(result?);
        }
        drop(staged);

        for mapping in mappings {
            session.add_mapping(mapping);
        }
        Ok(())
    }

    /// Upload one input, served from the cache when its content is already
    /// on the remote host.
    async fn stage_input(&self, local: PathBuf) -> Result<FileMapping, CoordinationError> {
        let hash = content_hash(&local).map_err(|e| CoordinationError::Transfer {
            path: local.display().to_string(),
            reason: format!("failed to hash local file: {e}"),
        })?;
        let basename = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| CoordinationError::Transfer {
                path: local.display().to_string(),
                reason: "input path has no file name".to_string(),
            })?;

        if let Some(cached) = self.cache.lookup(&hash, &basename).await {
            debug!("Using cached upload for {}: {}", local.display(), cached);
            self.mark_executable_if_needed(&local, &cached).await;
            return Ok(FileMapping::input(local, cached, hash, true));
        }

        let remote_path = self.cache.remote_path_for(&hash, &basename);
        self.upload_verified(&local, &remote_path, &hash).await?;
        self.mark_executable_if_needed(&local, &remote_path).await;
        self.cache.record(&hash, &remote_path);

        Ok(FileMapping::input(local, remote_path, hash, false))
    }

    /// Upload with verification and atomic visibility: the bytes land at
    /// `<final>.tmp`, the remote digest is compared against `local_hash`,
    /// and only a successful `mv` makes the file appear under its real
    /// name. Failures retry with exponential backoff. The caller supplies
    /// the digest so a file already hashed for the cache lookup is not
    /// read twice.
    pub async fn upload_verified(
        &self,
        local: &Path,
        remote_final: &str,
        local_hash: &str,
    ) -> Result<(), CoordinationError> {
        let remote_tmp = format!("{remote_final}.tmp");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .try_upload_once(local, &remote_tmp, remote_final, local_hash)
                .await
            {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    self.remove_remote(&remote_tmp).await;
                    if attempt > self.config.max_retries {
                        return Err(CoordinationError::Transfer {
                            path: local.display().to_string(),
                            reason: format!("giving up after {attempt} attempts: {reason}"),
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Upload attempt {} for {} failed ({}), retrying in {:?}",
                        attempt,
                        local.display(),
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_upload_once(
        &self,
        local: &Path,
        remote_tmp: &str,
        remote_final: &str,
        local_hash: &str,
    ) -> Result<(), String> {
        if let Some(parent) = remote_parent(remote_final) {
            let mkdir = vec!["mkdir".to_string(), "-p".to_string(), parent];
            let output = self
                .transport
                .execute(&mkdir)
                .await
                .map_err(|e| e.to_string())?;
            if !output.success() {
                return Err(format!("mkdir exited {}", output.exit_code));
            }
        }

        let upload = self.transport.upload_file(local, remote_tmp);
        tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), upload)
            .await
            .map_err(|_| "upload timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let remote_hash = self.remote_digest(remote_tmp).await?;
        if remote_hash != local_hash {
            return Err(format!(
                "digest mismatch: local {local_hash}, remote {remote_hash}"
            ));
        }

        let mv = vec![
            "mv".to_string(),
            remote_tmp.to_string(),
            remote_final.to_string(),
        ];
        let output = self.transport.execute(&mv).await.map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!("mv exited {}: {}", output.exit_code, output.stderr.trim()));
        }
        Ok(())
    }

    /// Fetch one declared output back to its requested local path.
    ///
    /// An absent remote path is reported as `Missing`, not an error. A
    /// remote directory is fetched file by file into the local directory.
    pub async fn download_output(
        &self,
        remote: &str,
        local: &Path,
    ) -> Result<OutputFetch, CoordinationError> {
        if self.remote_path_passes(remote, "-f").await? {
            self.download_verified(remote, local).await?;
            return Ok(OutputFetch::Downloaded(vec![local.to_path_buf()]));
        }

        if self.remote_path_passes(remote, "-d").await? {
            debug!("Remote output is a directory: {remote}");
            return self.download_directory(remote, local).await;
        }

        Ok(OutputFetch::Missing)
    }

    /// Download with the mirror of the upload discipline: bytes land at
    /// `<local>.tmp`, the digest is compared against the remote one, and a
    /// local rename makes the file visible.
    pub async fn download_verified(
        &self,
        remote: &str,
        local: &Path,
    ) -> Result<(), CoordinationError> {
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CoordinationError::Transfer {
                    path: local.display().to_string(),
                    reason: format!("failed to create local directory: {e}"),
                })?;
            }
        }

        let local_tmp = PathBuf::from(format!("{}.tmp", local.display()));

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_download_once(remote, &local_tmp, local).await {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    let _ = std::fs::remove_file(&local_tmp);
                    if attempt > self.config.max_retries {
                        return Err(CoordinationError::Transfer {
                            path: remote.to_string(),
                            reason: format!("giving up after {attempt} attempts: {reason}"),
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Download attempt {} for {} failed ({}), retrying in {:?}",
                        attempt, remote, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_download_once(
        &self,
        remote: &str,
        local_tmp: &Path,
        local: &Path,
    ) -> Result<(), String> {
        let download = self.transport.download_file(remote, local_tmp);
        tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), download)
            .await
            .map_err(|_| "download timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let remote_hash = self.remote_digest(remote).await?;
        let local_hash = content_hash(local_tmp).map_err(|e| e.to_string())?;
        if remote_hash != local_hash {
            return Err(format!(
                "digest mismatch: remote {remote_hash}, downloaded {local_hash}"
            ));
        }

        std::fs::rename(local_tmp, local).map_err(|e| e.to_string())
    }

    async fn download_directory(
        &self,
        remote_dir: &str,
        local_dir: &Path,
    ) -> Result<OutputFetch, CoordinationError> {
        let find = vec![
            "find".to_string(),
            remote_dir.to_string(),
            "-type".to_string(),
            "f".to_string(),
        ];
        let output = self.transport.execute(&find).await?;
        if !output.success() {
            warn!(
                "Failed to list remote directory {}: {}",
                remote_dir,
                output.stderr.trim()
            );
            return Ok(OutputFetch::Missing);
        }

        let files: Vec<&str> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if files.is_empty() {
            return Ok(OutputFetch::Missing);
        }

        let mut downloaded = Vec::new();
        for remote_file in files {
            let name = remote_file.rsplit('/').next().unwrap_or(remote_file);
            let local_file = local_dir.join(name);
            self.download_verified(remote_file, &local_file).await?;
            downloaded.push(local_file);
        }
        Ok(OutputFetch::Downloaded(downloaded))
    }

    async fn remote_path_passes(
        &self,
        remote: &str,
        test_flag: &str,
    ) -> Result<bool, CoordinationError> {
        let test = vec![
            "test".to_string(),
            test_flag.to_string(),
            remote.to_string(),
        ];
        let output = self.transport.execute(&test).await?;
        Ok(output.success())
    }

    /// Digest of a remote file via sha256sum, with the shasum fallback for
    /// macOS hosts that ship without coreutils.
    async fn remote_digest(&self, remote: &str) -> Result<String, String> {
        let primary = vec!["sha256sum".to_string(), remote.to_string()];
        if let Ok(output) = self.transport.execute(&primary).await {
            if output.success() {
                return parse_digest(&output.stdout)
                    .ok_or_else(|| format!("unparseable sha256sum output: {}", output.stdout));
            }
        }

        let fallback = vec![
            "shasum".to_string(),
            "-a".to_string(),
            "256".to_string(),
            remote.to_string(),
        ];
        let output = self
            .transport
            .execute(&fallback)
            .await
            .map_err(|e| e.to_string())?;
        if output.success() {
            parse_digest(&output.stdout)
                .ok_or_else(|| format!("unparseable shasum output: {}", output.stdout))
        } else {
            Err(format!(
                "no usable remote digest tool (shasum exited {})",
                output.exit_code
            ))
        }
    }

    /// Files that look like executables (no extension or .exe, under a bin
    /// directory) get their execute bit restored after transfer; scp does
    /// not always preserve it.
    async fn mark_executable_if_needed(&self, local: &Path, remote: &str) {
        let extension = local.extension().map(|e| e.to_string_lossy().to_string());
        let looks_executable = matches!(extension.as_deref(), None | Some("exe"))
            && local.components().any(|c| c.as_os_str() == "bin");
        if !looks_executable {
            return;
        }

        let chmod = vec!["chmod".to_string(), "+x".to_string(), remote.to_string()];
        match self.transport.execute(&chmod).await {
            Ok(output) if output.success() => {
                debug!("Set execute permissions on {remote}");
            }
            Ok(output) => {
                debug!("chmod +x {} exited {}", remote, output.exit_code);
            }
            Err(e) => {
                debug!("chmod +x {} failed: {}", remote, e);
            }
        }
    }

    async fn remove_remote(&self, remote: &str) {
        let rm = vec!["rm".to_string(), "-f".to_string(), remote.to_string()];
        if let Err(e) = self.transport.execute(&rm).await {
            debug!("Failed to remove remote temp file {}: {}", remote, e);
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay_ms.max(1);
        Duration::from_millis(base.saturating_mul(1u64 << (attempt - 1).min(6)))
    }
}

fn remote_parent(remote: &str) -> Option<String> {
    let trimmed = remote.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(trimmed[..idx].to_string())
}

fn parse_digest(stdout: &str) -> Option<String> {
    let token = stdout.split_whitespace().next()?;
    if token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}
