use std::fs;
use std::path::{Path, PathBuf};

use pxe_core::input::Key;
use serde::Deserialize;

use crate::capture::{CaptureSettings, DEFAULT_DELAY_CS, DEFAULT_SPEED};

pub const MAX_SCALE: u32 = 8;

/// Engine settings read from an optional JSON file. Every field may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub title: String,
    pub scale: u32,
    /// Key whose fresh press ends the run; `null` leaves only the window close.
    pub quit_key: Option<Key>,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub delay_cs: u16,
    pub speed: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Pixie Engine".to_string(),
            scale: 2,
            quit_key: Some(Key::Escape),
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("capture.gif"),
            delay_cs: DEFAULT_DELAY_CS,
            speed: DEFAULT_SPEED,
        }
    }
}

impl CaptureConfig {
    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings {
            path: self.path.clone(),
            delay_cs: self.delay_cs,
            speed: self.speed,
        }
    }
}

impl EngineConfig {
    /// Command-line values win over the file.
    pub fn apply_overrides(&mut self, scale: Option<u32>, capture: Option<PathBuf>) {
        if let Some(scale) = scale {
            self.scale = scale;
        }
        if let Some(path) = capture {
            self.capture.enabled = true;
            self.capture.path = path;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_SCALE).contains(&self.scale) {
            return Err(format!(
                "Config validation failed: scale must be between 1 and {MAX_SCALE}, got {}",
                self.scale
            ));
        }
        if self.capture.delay_cs == 0 {
            return Err("Config validation failed: capture.delay_cs must be positive".to_string());
        }
        if !(1..=30).contains(&self.capture.speed) {
            return Err(format!(
                "Config validation failed: capture.speed must be between 1 and 30, got {}",
                self.capture.speed
            ));
        }
        if self.title.trim().is_empty() {
            log::warn!("Config title is empty; the window title will only show the frame rate.");
        }
        Ok(())
    }
}

pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse config JSON {}: {e}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Defaults, then the optional file, then command-line overrides.
pub fn resolve_config(
    file: Option<&Path>,
    scale: Option<u32>,
    capture: Option<PathBuf>,
) -> Result<EngineConfig, String> {
    let mut config = match file {
        Some(path) => load_config_from_path(path)?,
        None => EngineConfig::default(),
    };
    config.apply_overrides(scale, capture);
    config.validate()?;
    Ok(config)
}
