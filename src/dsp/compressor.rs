//! Dynamics Compressor
//!
//! Feed-forward compressor with:
//! - Peak detection linked across channels
//! - Soft knee centred on the threshold
//! - One-pole attack/release smoothing of the gain
//! - Linear makeup gain applied after reduction

use super::{BlockClock, Processor};
use crate::engine::buffer::{db_to_linear, linear_to_db};

/// Detector floor so silence maps to a finite level
const LEVEL_FLOOR_DB: f32 = -96.0;

/// Resolved compressor configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    /// Threshold in dB
    pub threshold_db: f32,
    /// Compression ratio (N:1)
    pub ratio: f32,
    /// Knee width in dB (0 = hard knee)
    pub knee_db: f32,
    /// Attack time in seconds
    pub attack_secs: f32,
    /// Release time in seconds
    pub release_secs: f32,
    /// Makeup gain as a linear factor
    pub makeup_gain: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            ratio: 12.0,
            knee_db: 30.0,
            attack_secs: 0.003,
            release_secs: 0.25,
            makeup_gain: 1.0,
        }
    }
}

impl CompressorSettings {
    /// Gain change in dB the static curve applies at `input_db`
    ///
    /// Returns 0 below the knee and a negative value above it.
    pub fn gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.threshold_db;
        let ratio = self.ratio.max(1.0);
        let knee = self.knee_db.max(0.0);

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic blend from 1:1 at the knee start to the full ratio
                let over = input_db - knee_start;
                (1.0 / ratio - 1.0) * over * over / (2.0 * knee)
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }
}

/// Compressor stage
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current smoothed gain (linear), shared by all channels
    gain: f32,
}

impl Compressor {
    pub fn new(settings: CompressorSettings, sample_rate: f64) -> Self {
        // coeff = exp(-1 / time_in_samples)
        let coeff = |secs: f32| {
            let samples = secs * sample_rate as f32;
            if samples > 0.0 {
                (-1.0 / samples).exp()
            } else {
                0.0
            }
        };
        Self {
            attack_coeff: coeff(settings.attack_secs),
            release_coeff: coeff(settings.release_secs),
            settings,
            gain: 1.0,
        }
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// Current gain reduction in dB
    pub fn gain_reduction_db(&self) -> f32 {
        linear_to_db(self.gain).max(LEVEL_FLOOR_DB)
    }
}

impl Processor for Compressor {
    fn process(&mut self, block: &mut [Vec<f32>], _clock: BlockClock) {
        let frames = block.first().map_or(0, Vec::len);
        let makeup = self.settings.makeup_gain;

        for frame in 0..frames {
            let peak = block.iter().map(|ch| ch[frame].abs()).fold(0.0_f32, f32::max);
            let input_db = linear_to_db(peak).max(LEVEL_FLOOR_DB);
            let target = db_to_linear(self.settings.gain_reduction_db(input_db));

            let coeff = if target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            let total = self.gain * makeup;
            for channel in block.iter_mut() {
                channel[frame] *= total;
            }
        }
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn clock() -> BlockClock {
        BlockClock { start: 0.0, sample_rate: 8000.0 }
    }

    #[test]
    fn test_static_curve_hard_knee() {
        let settings = CompressorSettings {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 0.0,
            ..Default::default()
        };
        assert_eq!(settings.gain_reduction_db(-30.0), 0.0);
        assert_abs_diff_eq!(settings.gain_reduction_db(-8.0), -9.0, epsilon = 1e-5);
    }

    #[test]
    fn test_soft_knee_is_continuous() {
        let settings = CompressorSettings {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 10.0,
            ..Default::default()
        };
        assert_eq!(settings.gain_reduction_db(-25.0), 0.0);
        let below_edge = settings.gain_reduction_db(-15.0001);
        let above_edge = settings.gain_reduction_db(-14.9999);
        assert_abs_diff_eq!(below_edge, above_edge, epsilon = 1e-3);
        assert!(settings.gain_reduction_db(-20.0) < 0.0);
    }

    #[test]
    fn test_loud_signal_is_reduced_quiet_is_not() {
        let settings = CompressorSettings {
            threshold_db: -20.0,
            ratio: 10.0,
            knee_db: 0.0,
            attack_secs: 0.001,
            release_secs: 0.1,
            makeup_gain: 1.0,
        };

        let mut loud = Compressor::new(settings, 8000.0);
        let mut block = vec![vec![0.9; 4000]];
        loud.process(&mut block, clock());
        assert!(block[0][3999] < 0.2);
        assert!(loud.gain_reduction_db() < -10.0);

        let mut quiet = Compressor::new(settings, 8000.0);
        let mut block = vec![vec![0.01; 4000]];
        quiet.process(&mut block, clock());
        assert_abs_diff_eq!(block[0][3999], 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_makeup_gain_applies_after_reduction() {
        let settings = CompressorSettings {
            threshold_db: 0.0,
            ratio: 1.0,
            knee_db: 0.0,
            makeup_gain: 2.0,
            ..Default::default()
        };
        let mut comp = Compressor::new(settings, 8000.0);
        let mut block = vec![vec![0.25; 16], vec![-0.25; 16]];
        comp.process(&mut block, clock());
        assert_abs_diff_eq!(block[0][15], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(block[1][15], -0.5, epsilon = 1e-6);
    }
}
