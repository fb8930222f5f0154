// ABOUTME: Content-addressed cache of uploaded files on the remote host
// Entries are append-only and shared across sessions under {root}/cache

use crate::transport::Transport;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Compute the SHA-256 digest of a local file, streaming in chunks.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Maps content hashes to previously uploaded remote paths.
///
/// Lookups consult an in-memory map first and fall back to a remote
/// existence check, so the cache survives process restarts. Concurrent
/// coordinators racing to populate the same key write identical bytes
/// (hash equality implies byte equality), so duplicate stores are
/// idempotent and no locking of the remote directory is needed.
pub struct ContentCache {
    transport: Arc<dyn Transport>,
    cache_dir: String,
    known: Mutex<HashMap<String, String>>,
}

impl ContentCache {
    pub fn new(transport: Arc<dyn Transport>, remote_root: &str) -> Self {
        Self {
            transport,
            cache_dir: format!("{remote_root}/cache"),
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Remote path a file with this hash and basename would be cached at.
    pub fn remote_path_for(&self, hash: &str, basename: &str) -> String {
        format!("{}/{}/{}", self.cache_dir, hash, basename)
    }

    /// Return the cached remote path for this hash, if present either in
    /// memory or on the remote host.
    pub async fn lookup(&self, hash: &str, basename: &str) -> Option<String> {
        if let Some(path) = self.known.lock().expect("cache lock poisoned").get(hash) {
            return Some(path.clone());
        }

        let candidate = self.remote_path_for(hash, basename);
        let test = vec!["test".to_string(), "-f".to_string(), candidate.clone()];
        match self.transport.execute(&test).await {
            Ok(output) if output.success() => {
                debug!("Cache hit on remote for {hash}: {candidate}");
                self.record(hash, &candidate);
                Some(candidate)
            }
            Ok(_) => None,
            Err(e) => {
                // A failed existence check just means we re-upload.
                debug!("Cache check failed for {hash}: {e}");
                None
            }
        }
    }

    /// Record a freshly stored cache entry.
    pub fn record(&self, hash: &str, remote_path: &str) {
        self.known
            .lock()
            .expect("cache lock poisoned")
            .insert(hash.to_string(), remote_path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn content_hash_matches_known_vector() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        // sha256("abc")
        assert_eq!(
            content_hash(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    struct ExistsTransport {
        execute_calls: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl Transport for ExistsTransport {
        async fn execute(
            &self,
            _argv: &[String],
        ) -> Result<crate::transport::ExecOutput, crate::transport::TransportError> {
            *self.execute_calls.lock().unwrap() += 1;
            Ok(crate::transport::ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn upload_file(
            &self,
            _local: &Path,
            _remote: &str,
        ) -> Result<(), crate::transport::TransportError> {
            unreachable!("cache lookup never uploads")
        }

        async fn download_file(
            &self,
            _remote: &str,
            _local: &Path,
        ) -> Result<(), crate::transport::TransportError> {
            unreachable!("cache lookup never downloads")
        }
    }

    #[tokio::test]
    async fn remote_hit_is_memoized() {
        let transport = Arc::new(ExistsTransport {
            execute_calls: Mutex::new(0),
        });
        let cache = ContentCache::new(transport.clone(), "/tmp/topyaz");

        let first = cache.lookup("deadbeef", "in.jpg").await;
        assert_eq!(
            first.as_deref(),
            Some("/tmp/topyaz/cache/deadbeef/in.jpg")
        );
        assert_eq!(*transport.execute_calls.lock().unwrap(), 1);

        // Second lookup is served from memory without a remote round-trip.
        let second = cache.lookup("deadbeef", "in.jpg").await;
        assert_eq!(second, first);
        assert_eq!(*transport.execute_calls.lock().unwrap(), 1);
    }
}
