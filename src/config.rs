// ABOUTME: Configuration loading for the remote file coordinator
// Loads TOML from the user config directory with defaults for every field

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Top-level configuration for a coordinator instance.
///
/// Every field has a default, so a missing or partial config file is fine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub remote: RemoteConfig,
    pub detector: DetectorConfig,
    pub transfer: TransferConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base directory on the remote host for sessions and the upload cache.
    pub root_dir: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root_dir: "/tmp/topyaz".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Flags whose following argument names an output file.
    pub output_flags: Vec<String>,
    /// Flags whose following argument names an input file.
    pub input_flags: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            output_flags: vec!["-o".to_string(), "--output".to_string()],
            input_flags: vec![
                "-i".to_string(),
                "--input".to_string(),
                "--cli".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Retries per file after the first failed attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_delay_ms: u64,
    /// Timeout for a single upload or download operation.
    pub timeout_secs: u64,
    /// Bounded worker pool size for input uploads within one session.
    pub max_concurrent_uploads: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            timeout_secs: 3600,
            max_concurrent_uploads: 4,
        }
    }
}

/// One entry of the GUI application lookup table.
///
/// An executable argument matching any of `patterns` is treated as a GUI
/// application that needs a display on the remote host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuiPattern {
    pub name: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Known GUI applications, matched by substring against the executable.
    pub gui_patterns: Vec<GuiPattern>,
    /// Screen geometry handed to xvfb-run when that strategy is chosen.
    pub xvfb_screen_size: String,
    /// Below this the coordination refuses to run.
    pub min_memory_gb: f64,
    /// Below this a warning is logged but execution proceeds.
    pub recommended_memory_gb: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            gui_patterns: vec![
                GuiPattern {
                    name: "topaz_photo_ai".to_string(),
                    patterns: vec![
                        "tpai".to_string(),
                        "Topaz Photo AI".to_string(),
                    ],
                },
                GuiPattern {
                    name: "topaz_gigapixel".to_string(),
                    patterns: vec![
                        "gigapixel".to_string(),
                        "Topaz Gigapixel AI".to_string(),
                    ],
                },
                GuiPattern {
                    name: "topaz_video_ai".to_string(),
                    patterns: vec!["Video AI".to_string()],
                },
            ],
            xvfb_screen_size: "1024x768x24".to_string(),
            min_memory_gb: 4.0,
            recommended_memory_gb: 8.0,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from `$TOPYAZ_CONFIG` or the platform config dir.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        match path {
            Some(path) if path.exists() => {
                info!("Loading coordinator config from {}", path.display());
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let config: Self = toml::from_str(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                Ok(config)
            }
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TOPYAZ_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("topyaz").join("config.toml"))
    }
}
