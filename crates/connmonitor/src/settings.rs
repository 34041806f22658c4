//! Daemon settings loading and validation.
//!
//! These are process-wide knobs (logging, probe timeouts, output buffering),
//! separate from the per-host options in the host list.

use crate::collector::ProbeTimeouts;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Settings error types
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read settings file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid settings: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Top-level settings document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub probes: ProbeSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

impl Validate for Settings {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.supervisor.validate()?;
        self.probes.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    /// `text` or `json`
    pub format: Option<String>,
}

/// Orchestrator liveness check settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Lower bound on the liveness check interval
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_min_tick")]
    pub min_tick: Duration,
}

/// Per-wait probe timeouts
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProbeSettings {
    /// Wait for a single echo reply
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub ping_timeout: Duration,

    /// Wait for a single trace hop
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub hop_timeout: Duration,

    /// Wait for a single port connection
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub scan_timeout: Duration,
}

/// Output pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OutputSettings {
    /// Records buffered between collectors and the writer
    #[validate(range(min = 1, max = 100000))]
    pub channel_size: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            min_tick: Duration::from_millis(100),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(500),
            hop_timeout: Duration::from_millis(500),
            scan_timeout: Duration::from_millis(500),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { channel_size: 1024 }
    }
}

fn validate_min_tick(tick: &Duration) -> Result<(), ValidationError> {
    let millis = tick.as_millis();
    if millis < 10 || millis > 60_000 {
        return Err(ValidationError::new("min_tick_out_of_range"));
    }
    Ok(())
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 1 || millis > 60_000 {
        return Err(ValidationError::new("probe_timeout_out_of_range"));
    }
    Ok(())
}

impl Settings {
    /// Load settings from `explicit` if given, otherwise from the first
    /// existing default location, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(SettingsError::FileNotFound(path.to_path_buf()));
            }
            tracing::info!("Loading settings from: {}", path.display());
            return Self::load_from_file(path);
        }

        match Self::find_settings_file() {
            Some(path) => {
                tracing::info!("Loading settings from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_yaml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    fn find_settings_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/connmonitor/connmonitor.yaml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/connmonitor/connmonitor.yaml"));
        }

        paths.push(PathBuf::from("./connmonitor.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    pub fn probe_timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            ping: self.probes.ping_timeout,
            hop: self.probes.hop_timeout,
            scan: self.probes.scan_timeout,
        }
    }

    /// Whether structured log output was requested
    pub fn json_logs(&self) -> bool {
        self.logging
            .format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}
