// ABOUTME: In-memory fake transport for coordination tests
// Emulates the remote filesystem and the shell utilities the coordinator stages with

// Each test binary uses a different slice of this helper.
#![allow(dead_code)]

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use topyaz_coordination::transport::{ExecOutput, Transport, TransportError};

/// Route coordinator logs through the test harness when RUST_LOG is set.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct RemoteFs {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
}

#[derive(Default)]
pub struct Counters {
    pub uploads: usize,
    pub downloads: usize,
    pub session_mkdirs: usize,
    pub session_removals: usize,
}

/// What the fake does when the wrapped tool itself is executed.
pub struct ToolBehavior {
    pub exit_code: i32,
    pub stdout: String,
    /// Bytes written to every remote path that follows a `-o` argument.
    pub output_bytes: Option<Vec<u8>>,
}

impl Default for ToolBehavior {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            output_bytes: None,
        }
    }
}

pub struct FakeTransport {
    pub fs: Mutex<RemoteFs>,
    pub counters: Mutex<Counters>,
    pub executed: Mutex<Vec<Vec<String>>>,
    pub tool: Mutex<ToolBehavior>,
    /// Value of $DISPLAY on the fake host. Non-empty means a display exists.
    pub display_env: Mutex<String>,
    /// Binaries `which` finds on the fake host.
    pub which_available: Mutex<BTreeSet<String>>,
    /// Downloads of remote paths containing this substring fail.
    pub fail_downloads_matching: Mutex<Option<String>>,
    /// When set, executing the wrapped tool reports a connectivity failure.
    pub fail_tool_exec: Mutex<bool>,
    /// Number of upcoming uploads whose bytes get corrupted in transit.
    pub corrupt_next_uploads: Mutex<u32>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            fs: Mutex::new(RemoteFs::default()),
            counters: Mutex::new(Counters::default()),
            executed: Mutex::new(Vec::new()),
            tool: Mutex::new(ToolBehavior::default()),
            display_env: Mutex::new(":0".to_string()),
            which_available: Mutex::new(BTreeSet::new()),
            fail_downloads_matching: Mutex::new(None),
            fail_tool_exec: Mutex::new(false),
            corrupt_next_uploads: Mutex::new(0),
        }
    }

    pub fn corrupt_next_uploads(&self, count: u32) {
        *self.corrupt_next_uploads.lock().unwrap() = count;
    }

    pub fn set_tool(&self, behavior: ToolBehavior) {
        *self.tool.lock().unwrap() = behavior;
    }

    pub fn set_display(&self, value: &str) {
        *self.display_env.lock().unwrap() = value.to_string();
    }

    pub fn add_binary(&self, name: &str) {
        self.which_available.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_downloads_matching(&self, needle: &str) {
        *self.fail_downloads_matching.lock().unwrap() = Some(needle.to_string());
    }

    pub fn fail_tool_exec(&self) {
        *self.fail_tool_exec.lock().unwrap() = true;
    }

    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.lock().unwrap().files.get(path).cloned()
    }

    pub fn session_paths_remaining(&self) -> Vec<String> {
        let fs = self.fs.lock().unwrap();
        fs.files
            .keys()
            .chain(fs.dirs.iter())
            .filter(|p| p.contains("/sessions/"))
            .cloned()
            .collect()
    }

    pub fn session_dirs_created(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|argv| argv.first().map(String::as_str) == Some("mkdir"))
            .filter_map(|argv| argv.iter().find(|a| a.contains("/sessions/")))
            .map(|dir| {
                // inputs/outputs/work all share the session base dir
                let mut base = dir.as_str();
                for suffix in ["/inputs", "/outputs", "/work"] {
                    base = base.strip_suffix(suffix).unwrap_or(base);
                }
                base.to_string()
            })
            .collect()
    }

    fn digest_of(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn run_tool(&self, argv: &[String]) -> Result<ExecOutput, TransportError> {
        if *self.fail_tool_exec.lock().unwrap() {
            return Err(TransportError::ConnectionFailed(
                "connection reset by peer".to_string(),
            ));
        }

        // xvfb-run wrapping prefixes the real command after "--".
        let argv: Vec<String> = if argv.first().map(String::as_str) == Some("xvfb-run") {
            match argv.iter().position(|a| a == "--") {
                Some(idx) => argv[idx + 1..].to_vec(),
                None => argv.to_vec(),
            }
        } else {
            argv.to_vec()
        };

        let tool = self.tool.lock().unwrap();
        if let Some(bytes) = &tool.output_bytes {
            let mut fs = self.fs.lock().unwrap();
            for (i, arg) in argv.iter().enumerate() {
                if arg == "-o" || arg == "--output" {
                    if let Some(target) = argv.get(i + 1) {
                        fs.files.insert(target.clone(), bytes.clone());
                    }
                }
            }
        }
        Ok(ExecOutput {
            exit_code: tool.exit_code,
            stdout: tool.stdout.clone(),
            stderr: String::new(),
        })
    }
}

fn ok(stdout: impl Into<String>) -> Result<ExecOutput, TransportError> {
    Ok(ExecOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    })
}

fn fail(exit_code: i32) -> Result<ExecOutput, TransportError> {
    Ok(ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: String::new(),
    })
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, argv: &[String]) -> Result<ExecOutput, TransportError> {
        self.executed.lock().unwrap().push(argv.to_vec());

        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["mkdir", "-p", dirs @ ..] => {
                let mut fs = self.fs.lock().unwrap();
                for dir in dirs {
                    fs.dirs.insert(dir.to_string());
                }
                if dirs.iter().any(|d| d.contains("/sessions/")) {
                    self.counters.lock().unwrap().session_mkdirs += 1;
                }
                ok("")
            }
            ["rm", "-rf", target] => {
                let mut fs = self.fs.lock().unwrap();
                let prefix = format!("{target}/");
                fs.files
                    .retain(|path, _| path != target && !path.starts_with(&prefix));
                fs.dirs
                    .retain(|dir| dir != target && !dir.starts_with(&prefix));
                if target.contains("/sessions/") {
                    self.counters.lock().unwrap().session_removals += 1;
                }
                ok("")
            }
            ["rm", "-f", target] => {
                self.fs.lock().unwrap().files.remove(*target);
                ok("")
            }
            ["test", "-f", path] => {
                if self.fs.lock().unwrap().files.contains_key(*path) {
                    ok("")
                } else {
                    fail(1)
                }
            }
            ["test", "-d", path] => {
                let fs = self.fs.lock().unwrap();
                let prefix = format!("{path}/");
                if fs.dirs.contains(*path) || fs.files.keys().any(|f| f.starts_with(&prefix)) {
                    ok("")
                } else {
                    fail(1)
                }
            }
            ["mv", from, to] => {
                let mut fs = self.fs.lock().unwrap();
                match fs.files.remove(*from) {
                    Some(bytes) => {
                        fs.files.insert(to.to_string(), bytes);
                        ok("")
                    }
                    None => fail(1),
                }
            }
            ["sha256sum", path] | ["shasum", "-a", "256", path] => {
                match self.fs.lock().unwrap().files.get(*path) {
                    Some(bytes) => ok(format!("{}  {}\n", Self::digest_of(bytes), path)),
                    None => fail(1),
                }
            }
            ["chmod", ..] => ok(""),
            ["cat", path] => match self.fs.lock().unwrap().files.get(*path) {
                Some(bytes) => ok(String::from_utf8_lossy(bytes).to_string()),
                None => fail(1),
            },
            ["find", dir, "-type", "f"] => {
                let fs = self.fs.lock().unwrap();
                let prefix = format!("{dir}/");
                let listing: String = fs
                    .files
                    .keys()
                    .filter(|f| f.starts_with(&prefix))
                    .map(|f| format!("{f}\n"))
                    .collect();
                ok(listing)
            }
            ["uname", "-s"] => ok("Linux\n"),
            ["free", "-m"] => ok("              total        used\nMem:          32768        2048\n"),
            ["sysctl", "-n", "hw.memsize"] => fail(1),
            ["which", binary] => {
                if self.which_available.lock().unwrap().contains(*binary) {
                    ok(format!("/usr/bin/{binary}\n"))
                } else {
                    fail(1)
                }
            }
            ["sh", "-c", "echo ${DISPLAY:-}"] => {
                ok(format!("{}\n", self.display_env.lock().unwrap()))
            }
            ["sh", "-c", script] if script.starts_with("echo coordination-self-test > ") => {
                let target = script
                    .trim_start_matches("echo coordination-self-test > ")
                    .to_string();
                self.fs
                    .lock()
                    .unwrap()
                    .files
                    .insert(target, b"coordination-self-test\n".to_vec());
                ok("")
            }
            _ => self.run_tool(argv),
        }
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let mut bytes = std::fs::read(local).map_err(|e| TransportError::UploadFailed {
            local: local.display().to_string(),
            reason: e.to_string(),
        })?;
        {
            let mut corrupt = self.corrupt_next_uploads.lock().unwrap();
            if *corrupt > 0 {
                *corrupt -= 1;
                bytes.push(0xFF);
            }
        }
        self.counters.lock().unwrap().uploads += 1;
        self.fs
            .lock()
            .unwrap()
            .files
            .insert(remote.to_string(), bytes);
        Ok(())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        if let Some(needle) = self.fail_downloads_matching.lock().unwrap().as_deref() {
            if remote.contains(needle) {
                return Err(TransportError::DownloadFailed {
                    remote: remote.to_string(),
                    reason: "simulated transport failure".to_string(),
                });
            }
        }
        let bytes = self
            .fs
            .lock()
            .unwrap()
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::DownloadFailed {
                remote: remote.to_string(),
                reason: "no such remote file".to_string(),
            })?;
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(TransportError::Io)?;
            }
        }
        std::fs::write(local, bytes).map_err(TransportError::Io)?;
        self.counters.lock().unwrap().downloads += 1;
        Ok(())
    }
}
