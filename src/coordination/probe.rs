// ABOUTME: Remote host capability probing: GUI application detection, display
// strategy selection, and basic resource suitability checks

use crate::config::{GuiPattern, ProbeConfig};
use crate::coordination::error::CoordinationError;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// How a display can be obtained for a GUI executable on the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStrategy {
    /// A display is already available (or the executable does not need one).
    None,
    /// xvfb-run can provide a virtual framebuffer.
    XvfbAvailable,
    /// The platform has a native session primitive (macOS launchctl).
    PlatformNativeDisplay,
    /// No display mechanism found. Execution is still attempted, but a
    /// failure is reported as "requires interactive session".
    Unsupported,
}

/// Probe result for one remote executable path. Cached for the process
/// lifetime; a fresh process re-probes.
#[derive(Debug, Clone)]
pub struct RemoteCapability {
    pub is_gui_application: bool,
    pub display_strategy: DisplayStrategy,
}

impl RemoteCapability {
    fn headless() -> Self {
        Self {
            is_gui_application: false,
            display_strategy: DisplayStrategy::None,
        }
    }
}

/// Remote OS and memory, gathered once per process.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub os: String,
    pub memory_gb: Option<f64>,
}

pub struct RemoteCapabilityProbe {
    transport: Arc<dyn Transport>,
    config: ProbeConfig,
    capabilities: Mutex<HashMap<String, RemoteCapability>>,
    host_info: Mutex<Option<HostInfo>>,
}

impl RemoteCapabilityProbe {
    pub fn new(transport: Arc<dyn Transport>, config: ProbeConfig) -> Self {
        Self {
            transport,
            config,
            capabilities: Mutex::new(HashMap::new()),
            host_info: Mutex::new(None),
        }
    }

    /// Capability of one executable, probing the remote host on first use.
    /// Non-GUI executables never touch the network.
    pub async fn capability_for(&self, executable: &str) -> RemoteCapability {
        if let Some(cached) = self
            .capabilities
            .lock()
            .expect("capability lock poisoned")
            .get(executable)
        {
            return cached.clone();
        }

        let capability = match self.classify_gui(executable) {
            Some(pattern) => {
                debug!(
                    "Detected GUI application ({}) in {executable}",
                    pattern.name
                );
                RemoteCapability {
                    is_gui_application: true,
                    display_strategy: self.probe_display_strategy().await,
                }
            }
            None => RemoteCapability::headless(),
        };

        self.capabilities
            .lock()
            .expect("capability lock poisoned")
            .insert(executable.to_string(), capability.clone());
        capability
    }

    fn classify_gui(&self, executable: &str) -> Option<&GuiPattern> {
        self.config
            .gui_patterns
            .iter()
            .find(|entry| entry.patterns.iter().any(|p| executable.contains(p.as_str())))
    }

    async fn probe_display_strategy(&self) -> DisplayStrategy {
        // An existing DISPLAY means nothing needs to be set up.
        if let Some(display_var) = self.remote_stdout(&["sh", "-c", "echo ${DISPLAY:-}"]).await {
            if !display_var.is_empty() {
                debug!("Remote host already exports DISPLAY={display_var}");
                return DisplayStrategy::None;
            }
        }

        if self.remote_succeeds(&["which", "xvfb-run"]).await {
            return DisplayStrategy::XvfbAvailable;
        }

        let platform = self
            .remote_stdout(&["uname", "-s"]).await
            .unwrap_or_default()
            .to_lowercase();
        if platform == "darwin" && self.remote_succeeds(&["which", "launchctl"]).await {
            return DisplayStrategy::PlatformNativeDisplay;
        }

        DisplayStrategy::Unsupported
    }

    /// Prefix the translated argv with whatever the chosen display strategy
    /// needs. `Unsupported` leaves the command alone so that future remote
    /// capabilities are not locked out; the coordinator translates a
    /// resulting failure into a capability error instead.
    pub fn wrap_command(&self, capability: &RemoteCapability, argv: Vec<String>) -> Vec<String> {
        if !capability.is_gui_application {
            return argv;
        }
        match capability.display_strategy {
            DisplayStrategy::XvfbAvailable => {
                let mut wrapped = vec![
                    "xvfb-run".to_string(),
                    "-a".to_string(),
                    "-s".to_string(),
                    format!("-screen 0 {}", self.config.xvfb_screen_size),
                    "--".to_string(),
                ];
                wrapped.extend(argv);
                wrapped
            }
            DisplayStrategy::None
            | DisplayStrategy::PlatformNativeDisplay
            | DisplayStrategy::Unsupported => argv,
        }
    }

    /// Remote OS and memory, fetched once and cached.
    pub async fn host_info(&self) -> HostInfo {
        if let Some(info) = self
            .host_info
            .lock()
            .expect("host info lock poisoned")
            .clone()
        {
            return info;
        }

        let os = self
            .remote_stdout(&["uname", "-s"]).await
            .unwrap_or_default();
        let memory_gb = self.probe_memory_gb().await;
        let info = HostInfo { os, memory_gb };
        debug!("Remote host info: {:?}", info);

        *self.host_info.lock().expect("host info lock poisoned") = Some(info.clone());
        info
    }

    /// Refuse hosts below the configured memory floor; warn below the
    /// recommended amount. A host whose memory cannot be determined passes
    /// with a warning.
    pub async fn check_host_resources(&self) -> Result<(), CoordinationError> {
        let info = self.host_info().await;
        match info.memory_gb {
            Some(memory_gb) if memory_gb < self.config.min_memory_gb => {
                Err(CoordinationError::Capability(format!(
                    "insufficient remote memory: {:.1}GB available, {:.0}GB+ required",
                    memory_gb, self.config.min_memory_gb
                )))
            }
            Some(memory_gb) => {
                if memory_gb < self.config.recommended_memory_gb {
                    warn!(
                        "Remote host has only {:.1}GB memory; processing may fail or be killed",
                        memory_gb
                    );
                }
                Ok(())
            }
            None => {
                warn!("Could not determine remote memory, continuing anyway");
                Ok(())
            }
        }
    }

    async fn probe_memory_gb(&self) -> Option<f64> {
        // Linux first: total MB is the second column of the Mem: line.
        if let Some(stdout) = self.remote_stdout(&["free", "-m"]).await {
            if let Some(total_mb) = stdout
                .lines()
                .nth(1)
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|field| field.parse::<f64>().ok())
            {
                return Some(total_mb / 1024.0);
            }
        }

        // macOS fallback.
        if let Some(stdout) = self.remote_stdout(&["sysctl", "-n", "hw.memsize"]).await {
            if let Ok(bytes) = stdout.parse::<f64>() {
                return Some(bytes / (1024.0 * 1024.0 * 1024.0));
            }
        }

        None
    }

    async fn remote_succeeds(&self, argv: &[&str]) -> bool {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        matches!(self.transport.execute(&argv).await, Ok(output) if output.success())
    }

    async fn remote_stdout(&self, argv: &[&str]) -> Option<String> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        match self.transport.execute(&argv).await {
            Ok(output) if output.success() => Some(output.stdout.trim().to_string()),
            _ => None,
        }
    }
}
