//! Application state shared by the command loop and the metrics reporter.

use std::path::PathBuf;
use std::sync::Arc;

use livefilter_core::{DuplexEngine, EngineError};
use parking_lot::Mutex;
use tracing::warn;

use crate::settings::{save_settings, AppSettings};

pub struct AppState {
    /// Wrapped in `Arc` so the reporter thread can poll metrics.
    pub engine: Arc<DuplexEngine>,
    /// Persisted app settings cache.
    pub settings: Mutex<AppSettings>,
    /// `None` disables persistence (tests, `--no-save`).
    pub settings_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        engine: Arc<DuplexEngine>,
        settings: AppSettings,
        settings_path: Option<PathBuf>,
    ) -> Self {
        Self {
            engine,
            settings: Mutex::new(settings),
            settings_path,
        }
    }

    /// Start on the devices currently selected in settings.
    pub fn start_engine(&self) -> Result<(), EngineError> {
        let (input, output) = {
            let settings = self.settings.lock();
            (settings.input_device.clone(), settings.output_device.clone())
        };
        self.engine.start(input, output)
    }

    /// Restart if running so a device change takes effect.
    pub fn restart_if_running(&self) -> Result<(), EngineError> {
        if !self.engine.status().is_running() {
            return Ok(());
        }
        self.engine.stop()?;
        self.start_engine()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut AppSettings)) {
        let mut settings = self.settings.lock();
        f(&mut settings);
        settings.normalize();
        if let Some(path) = self.settings_path.as_ref() {
            if let Err(e) = save_settings(path, &settings) {
                warn!("failed to save settings to {}: {e}", path.display());
            }
        }
    }
}
