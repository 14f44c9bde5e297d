//! Three-Band EQ
//!
//! Fixed topology: low shelf at 250 Hz, mid peak at 1 kHz (Q = 1) and high
//! shelf at 4 kHz. Only the three band gains are adjustable. Each band is
//! a biquad computed with the Audio EQ Cookbook formulas.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use super::{BlockClock, Processor};

/// Low shelf corner frequency
pub const LOW_SHELF_HZ: f64 = 250.0;
/// Mid peak centre frequency
pub const MID_PEAK_HZ: f64 = 1000.0;
/// Mid peak bandwidth
pub const MID_PEAK_Q: f64 = 1.0;
/// High shelf corner frequency
pub const HIGH_SHELF_HZ: f64 = 4000.0;

/// Shelf slope S = 1 expressed as a Q
const SHELF_Q: f64 = FRAC_1_SQRT_2;

/// Band gains for a `ThreeBandEq`, in dB
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EqSettings {
    pub low_gain_db: f32,
    pub mid_gain_db: f32,
    pub high_gain_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandShape {
    Peak,
    LowShelf,
    HighShelf,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn calculate(shape: BandShape, sample_rate: f64, frequency: f64, gain_db: f64, q: f64) -> Self {
        // Keep the corner below Nyquist for low test rates
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match shape {
            BandShape::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            BandShape::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            BandShape::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Direct Form I
    #[inline]
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Low shelf, mid peak and high shelf in series
#[derive(Debug, Clone)]
pub struct ThreeBandEq {
    settings: EqSettings,
    coeffs: [BiquadCoeffs; 3],
    /// [channel][band]
    state: Vec<[BiquadState; 3]>,
}

impl ThreeBandEq {
    pub fn new(settings: EqSettings, sample_rate: f64) -> Self {
        let sr = sample_rate;
        let coeffs = [
            BiquadCoeffs::calculate(
                BandShape::LowShelf,
                sr,
                LOW_SHELF_HZ,
                settings.low_gain_db as f64,
                SHELF_Q,
            ),
            BiquadCoeffs::calculate(
                BandShape::Peak,
                sr,
                MID_PEAK_HZ,
                settings.mid_gain_db as f64,
                MID_PEAK_Q,
            ),
            BiquadCoeffs::calculate(
                BandShape::HighShelf,
                sr,
                HIGH_SHELF_HZ,
                settings.high_gain_db as f64,
                SHELF_Q,
            ),
        ];
        Self {
            settings,
            coeffs,
            state: vec![[BiquadState::default(); 3]; 2],
        }
    }

    pub fn settings(&self) -> EqSettings {
        self.settings
    }
}

impl Processor for ThreeBandEq {
    fn process(&mut self, block: &mut [Vec<f32>], _clock: BlockClock) {
        if self.state.len() < block.len() {
            self.state.resize(block.len(), [BiquadState::default(); 3]);
        }
        for (channel, state) in block.iter_mut().zip(self.state.iter_mut()) {
            for sample in channel.iter_mut() {
                let mut value = *sample as f64;
                for (band, coeffs) in state.iter_mut().zip(self.coeffs.iter()) {
                    value = band.process(value, coeffs);
                }
                *sample = value as f32;
            }
        }
    }

    fn reset(&mut self) {
        for bands in &mut self.state {
            *bands = [BiquadState::default(); 3];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: f64 = 44100.0;

    fn sine(frequency: f64, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * frequency * i as f64 / SR).sin() as f32 * 0.5)
            .collect()
    }

    fn rms(samples: &[f32]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    /// Gain in dB the EQ applies to a steady sine, ignoring the settle time
    fn gain_at(settings: EqSettings, frequency: f64) -> f64 {
        let mut eq = ThreeBandEq::new(settings, SR);
        let input = sine(frequency, 22050);
        let mut block = vec![input.clone(), input.clone()];
        eq.process(&mut block, BlockClock { start: 0.0, sample_rate: SR });
        20.0 * (rms(&block[0][11025..]) / rms(&input[11025..])).log10()
    }

    #[test]
    fn test_flat_settings_are_transparent() {
        let gain = gain_at(EqSettings::default(), 1000.0);
        assert_abs_diff_eq!(gain, 0.0, epsilon = 0.01);
    }

    #[test]
    fn test_mid_band_boost_at_centre() {
        let settings = EqSettings { mid_gain_db: 6.0, ..Default::default() };
        assert_abs_diff_eq!(gain_at(settings, MID_PEAK_HZ), 6.0, epsilon = 0.3);
    }

    #[test]
    fn test_low_shelf_cut_leaves_highs() {
        let settings = EqSettings { low_gain_db: -12.0, ..Default::default() };
        assert!(gain_at(settings, 50.0) < -10.0);
        assert_abs_diff_eq!(gain_at(settings, 10000.0), 0.0, epsilon = 0.5);
    }

    #[test]
    fn test_high_shelf_boost() {
        let settings = EqSettings { high_gain_db: 9.0, ..Default::default() };
        assert!(gain_at(settings, 12000.0) > 8.0);
        assert_abs_diff_eq!(gain_at(settings, 100.0), 0.0, epsilon = 0.5);
    }
}
