//! Shaper configuration via TOML, for machine config files.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::shaper::InputShaperType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShaperConfig {
    #[serde(default)]
    pub r#type: InputShaperType,
    #[serde(default = "default_frequency")]
    pub frequency: f32,
    #[serde(default = "default_damping")]
    pub damping: f32,
    #[serde(default = "default_min_acceleration")]
    pub min_acceleration: f32,
    /// Cumulative impulse amplitudes for the `custom` type.
    #[serde(default)]
    pub amplitudes: Option<Vec<f32>>,
    /// Impulse durations (seconds) for the `custom` type.
    #[serde(default)]
    pub durations: Option<Vec<f32>>,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            r#type: InputShaperType::None,
            frequency: default_frequency(),
            damping: default_damping(),
            min_acceleration: default_min_acceleration(),
            amplitudes: None,
            durations: None,
        }
    }
}

impl ShaperConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.frequency <= 0.0 || self.frequency > 1000.0 {
            return Err(format!(
                "Shaper frequency {} must be in (0, 1000]Hz",
                self.frequency
            ));
        }
        if self.damping < 0.0 || self.damping > 0.99 {
            return Err(format!(
                "Shaper damping {} must be between 0 and 0.99",
                self.damping
            ));
        }
        if self.r#type == InputShaperType::Custom && self.amplitudes.is_none() {
            return Err("Custom shaper requires amplitudes".to_string());
        }
        Ok(())
    }
}

fn default_frequency() -> f32 {
    40.0
}
fn default_damping() -> f32 {
    0.1
}
fn default_min_acceleration() -> f32 {
    10.0
}

pub fn load_shaper_config(path: &str) -> Result<ShaperConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse shaper config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read shaper config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
