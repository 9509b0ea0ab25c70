//! Persisted settings.
//!
//! The record is TOML on disk. Loading never fails: an absent file yields
//! defaults, a malformed one is logged and replaced by defaults, and
//! out-of-range values are clamped into their documented bounds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_SENSITIVITY: f64 = 0.1;
pub const MAX_SENSITIVITY: f64 = 5.0;
pub const DEFAULT_SENSITIVITY: f64 = 1.0;
pub const SENSITIVITY_STEP: f64 = 0.1;

/// File name used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "multicursor.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// How a disconnect reported by enumeration is applied to tracked devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectPolicy {
    /// Remove only the device whose handle vanished.
    Precise,
    /// Any vanished device invalidates every tracked device.
    InvalidateAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Render-surface width override. Detected from the OS when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Render-surface height override. Detected from the OS when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Render-surface units → physical OS cursor pixels.
    pub scale_factor: f64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            scale_factor: 1.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub interval_ms: u64,
    /// Checks closer together than this are skipped.
    pub debounce_ms: u64,
    pub enumeration_timeout_ms: u64,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            debounce_ms: 250,
            enumeration_timeout_ms: 5000,
            disconnect_policy: DisconnectPolicy::Precise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub enabled: bool,
    /// Program and arguments. Empty means "use the platform default", which
    /// may itself be empty (no sampler).
    pub command: Vec<String>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// File or FIFO receiving render messages. Stdout when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensitivity: f64,
    /// Scheduler tick period in milliseconds.
    pub refresh_rate: u64,
    pub max_cursors: u32,
    pub cursor_size: u32,
    pub cursor_colors: Vec<String>,
    /// Bypasses the scheduler frequency gate: sync on every tick.
    pub high_performance_mode: bool,
    /// When false, render coordinates are rounded to whole units.
    pub precise_positioning: bool,
    pub target_frequency_hz: u32,
    pub hide_system_cursor: bool,
    pub screen: ScreenConfig,
    pub presence: PresenceConfig,
    pub sampler: SamplerConfig,
    pub render: RenderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            refresh_rate: 1,
            max_cursors: 4,
            cursor_size: 20,
            cursor_colors: default_palette(),
            high_performance_mode: false,
            precise_positioning: true,
            target_frequency_hz: 1000,
            hide_system_cursor: false,
            screen: ScreenConfig::default(),
            presence: PresenceConfig::default(),
            sampler: SamplerConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

fn default_palette() -> Vec<String> {
    ["#FF0000", "#00FF00", "#0000FF", "#FFFF00"]
        .iter()
        .map(|c| (*c).to_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

impl Config {
    /// Parses a TOML record and normalizes it.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Loads `path`, falling back to defaults on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("config: {} not found, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                log::warn!("config: cannot read {}: {e}; using defaults", path.display());
                return Self::default();
            }
        };

        match Self::from_toml(&text) {
            Ok(config) => {
                log::info!("config: loaded {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("config: discarding {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Clamps every bounded field into range.
    fn normalize(&mut self) {
        self.sensitivity = clamp_sensitivity(self.sensitivity);
        if self.cursor_colors.is_empty() {
            self.cursor_colors = default_palette();
        }
        self.refresh_rate = self.refresh_rate.max(1);
        self.target_frequency_hz = self.target_frequency_hz.max(1);
        if !self.screen.scale_factor.is_finite() || self.screen.scale_factor <= 0.0 {
            self.screen.scale_factor = ScreenConfig::default().scale_factor;
        }
        self.screen.width = self.screen.width.filter(|w| w.is_finite() && *w > 0.0);
        self.screen.height = self.screen.height.filter(|h| h.is_finite() && *h > 0.0);
    }

    // -----------------------------------------------------------------------
    // Sensitivity commands
    // -----------------------------------------------------------------------

    pub fn increase_sensitivity(&mut self) -> f64 {
        self.sensitivity = clamp_sensitivity(self.sensitivity + SENSITIVITY_STEP);
        self.sensitivity
    }

    pub fn decrease_sensitivity(&mut self) -> f64 {
        self.sensitivity = clamp_sensitivity(self.sensitivity - SENSITIVITY_STEP);
        self.sensitivity
    }

    pub fn reset_sensitivity(&mut self) -> f64 {
        self.sensitivity = DEFAULT_SENSITIVITY;
        self.sensitivity
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.refresh_rate)
    }

    /// Minimum spacing between gated scheduler ticks.
    pub fn min_sync_interval(&self) -> Duration {
        if self.high_performance_mode {
            Duration::ZERO
        } else {
            Duration::from_nanos(1_000_000_000 / u64::from(self.target_frequency_hz))
        }
    }
}

/// Clamps to `[0.1, 5.0]` and rounds to one decimal so repeated steps do not drift.
pub fn clamp_sensitivity(value: f64) -> f64 {
    if !value.is_finite() {
        return DEFAULT_SENSITIVITY;
    }
    let rounded = (value * 10.0).round() / 10.0;
    rounded.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
