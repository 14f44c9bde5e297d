//! Engine configuration
//!
//! All tunables live in one serde struct so hosts can ship a JSON file
//! next to the binary. Every field has a default, so partial files work.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MixdeckError, Result};

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend sample rate in Hz
    pub sample_rate: u32,
    /// Duration of a freshly created project in seconds
    pub default_project_duration: f64,
    /// Click-avoidance fade applied at live clip boundaries, in seconds
    pub fade_duration: f64,
    /// Interval of the recording feedback tick, in seconds
    pub recording_tick: f64,
    /// Envelope resolution stored on clips at import time
    pub import_waveform_points: usize,
    /// Lowest display resolution (zoom <= 0.5)
    pub display_base_points: usize,
    /// Highest display resolution
    pub display_max_points: usize,
    /// Frames rendered per backend processing block
    pub render_quantum: usize,
    /// Seed mixed into every reverb impulse so renders are reproducible
    pub reverb_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            default_project_duration: 60.0,
            fade_duration: 0.005,
            recording_tick: 0.1,
            import_waveform_points: 5000,
            display_base_points: 2000,
            display_max_points: 20000,
            render_quantum: 512,
            reverb_seed: 0x6d69_7864_6563_6b00,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return Err(MixdeckError::InvalidConfig {
                reason: format!("sample_rate {} outside 8000..=192000", self.sample_rate),
            });
        }
        if self.default_project_duration <= 0.0 {
            return Err(MixdeckError::InvalidConfig {
                reason: "default_project_duration must be positive".to_string(),
            });
        }
        if self.fade_duration < 0.0 {
            return Err(MixdeckError::InvalidConfig {
                reason: "fade_duration must not be negative".to_string(),
            });
        }
        if self.recording_tick <= 0.0 {
            return Err(MixdeckError::InvalidConfig {
                reason: "recording_tick must be positive".to_string(),
            });
        }
        if self.render_quantum == 0 || !self.render_quantum.is_power_of_two() {
            return Err(MixdeckError::InvalidConfig {
                reason: format!("render_quantum {} must be a power of two", self.render_quantum),
            });
        }
        if self.display_base_points == 0 || self.display_max_points < self.display_base_points {
            return Err(MixdeckError::InvalidConfig {
                reason: "display point bounds are inconsistent".to_string(),
            });
        }
        Ok(())
    }

    /// Same config with a different sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}
