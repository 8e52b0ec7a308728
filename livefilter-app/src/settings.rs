//! Host settings persisted as JSON under the platform data directory.

use std::fs;
use std::path::{Path, PathBuf};

use livefilter_core::engine::ATTENUATION_RANGE_DB;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// `None` = system default.
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub attenuation_db: f32,
    pub post_filter_beta: Option<f32>,
    /// Model artifact. `DF_MODEL_TAR` takes precedence.
    pub model_path: Option<PathBuf>,
    /// Native library. `DEEPFILTER_DYLIB` takes precedence.
    pub library_path: Option<PathBuf>,
    pub native_log_level: String,
    pub autostart: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            attenuation_db: 24.0,
            post_filter_beta: None,
            model_path: None,
            library_path: None,
            native_log_level: "info".into(),
            autostart: false,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let (lo, hi) = ATTENUATION_RANGE_DB;
        self.attenuation_db = if self.attenuation_db.is_finite() {
            self.attenuation_db.clamp(lo, hi)
        } else {
            24.0
        };
        self.post_filter_beta = self
            .post_filter_beta
            .filter(|b| b.is_finite() && *b >= 0.0);
        self.input_device = normalize_device_name(self.input_device.as_deref());
        self.output_device = normalize_device_name(self.output_device.as_deref());
        self.model_path = self.model_path.take().filter(|p| !p.as_os_str().is_empty());
        self.library_path = self.library_path.take().filter(|p| !p.as_os_str().is_empty());
        self.native_log_level = normalize_log_level(&self.native_log_level);
    }
}

/// Trim a device name; empty and `default` select the system default.
pub fn normalize_device_name(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("default"))
        .map(str::to_string)
}

pub fn normalize_log_level(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => "off".into(),
        "error" => "error".into(),
        "warn" | "warning" => "warn".into(),
        "debug" => "debug".into(),
        "trace" => "trace".into(),
        _ => "info".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("LiveFilter")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("livefilter")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
