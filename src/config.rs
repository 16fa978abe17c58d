use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "SIGN_API_URL";

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults. Environment
    /// overrides are applied in both cases.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let config = Self::load(path)?;
            info!("✓ Configuration loaded from {}", path.display());
            config
        } else {
            warn!("Config {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.countdown_ticks == 0 {
            anyhow::bail!("capture.countdown_ticks must be at least 1");
        }
        if self.capture.tick_interval_ms == 0 || self.capture.recording_ms == 0 {
            anyhow::bail!("capture timer durations must be non-zero");
        }
        if self.capture.sequence_length == 0 {
            anyhow::bail!("capture.sequence_length must be at least 1");
        }
        if self.capture.frame_queue_depth == 0 {
            anyhow::bail!("capture.frame_queue_depth must be at least 1");
        }
        if self.preprocess.grid_width == 0 || self.preprocess.grid_height == 0 {
            anyhow::bail!("preprocess grid must be at least 1x1");
        }
        Ok(())
    }
}
