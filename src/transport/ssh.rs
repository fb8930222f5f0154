// ABOUTME: SSH transport implementation shelling out to the system ssh and scp binaries
// Key management and agent setup are the host environment's responsibility

use super::{ExecOutput, Transport, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl SshOptions {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Transport backed by the OpenSSH client tools.
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            port_flag.to_string(),
            self.options.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
        ];
        if let Some(identity) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    /// Quote an argument for the remote shell. ssh joins its trailing
    /// arguments with spaces and hands them to the login shell, so anything
    /// beyond plain words must be single-quoted.
    fn shell_quote(arg: &str) -> String {
        let plain = !arg.is_empty()
            && arg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@".contains(c));
        if plain {
            arg.to_string()
        } else {
            format!("'{}'", arg.replace('\'', "'\"'\"'"))
        }
    }

    fn build_command_string(argv: &[String]) -> String {
        argv.iter()
            .map(|arg| Self::shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(&self, argv: &[String]) -> Result<ExecOutput, TransportError> {
        let command_string = Self::build_command_string(argv);
        debug!("ssh {}: {}", self.options.target(), command_string);

        let output = tokio::process::Command::new("ssh")
            .args(self.common_args("-p"))
            .arg(self.options.target())
            .arg("--")
            .arg(&command_string)
            .output()
            .await
            .map_err(|e| TransportError::CommandFailed(format!("failed to spawn ssh: {e}")))?;

        // ssh reserves 255 for its own connection failures
        if output.status.code() == Some(255) {
            return Err(TransportError::ConnectionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        debug!("scp {} -> {}:{}", local.display(), self.options.host, remote);

        let output = tokio::process::Command::new("scp")
            .args(self.common_args("-P"))
            .arg("-q")
            .arg(local)
            .arg(format!("{}:{}", self.options.target(), Self::shell_quote(remote)))
            .output()
            .await
            .map_err(|e| TransportError::UploadFailed {
                local: local.display().to_string(),
                reason: format!("failed to spawn scp: {e}"),
            })?;

        if !output.status.success() {
            return Err(TransportError::UploadFailed {
                local: local.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        debug!("scp {}:{} -> {}", self.options.host, remote, local.display());

        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let output = tokio::process::Command::new("scp")
            .args(self.common_args("-P"))
            .arg("-q")
            .arg(format!("{}:{}", self.options.target(), Self::shell_quote(remote)))
            .arg(local)
            .output()
            .await
            .map_err(|e| TransportError::DownloadFailed {
                remote: remote.to_string(),
                reason: format!("failed to spawn scp: {e}"),
            })?;

        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("scp download of {} failed: {}", remote, reason);
            return Err(TransportError::DownloadFailed {
                remote: remote.to_string(),
                reason,
            });
        }
        Ok(())
    }
}
