//! Gain stages
//!
//! `GainStage` is a plain multiplier whose value the transport retargets
//! for volume/mute/solo routing. `FadeEnvelope` is the click-avoidance
//! envelope placed right after a live source: a short linear ramp up from
//! silence where the clip starts sounding and back down where it stops.

use super::{BlockClock, Processor};

// ============================================================================
// Gain Stage
// ============================================================================

/// Static linear gain
#[derive(Debug, Clone, PartialEq)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: sanitize(gain),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Retarget the gain; takes effect from the next block
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = sanitize(gain);
    }
}

#[inline]
fn sanitize(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.max(0.0)
    } else {
        0.0
    }
}

impl Processor for GainStage {
    fn process(&mut self, block: &mut [Vec<f32>], _clock: BlockClock) {
        if self.gain == 1.0 {
            return;
        }
        for channel in block.iter_mut() {
            for sample in channel.iter_mut() {
                *sample *= self.gain;
            }
        }
    }

    fn reset(&mut self) {}
}

// ============================================================================
// Fade Envelope
// ============================================================================

/// Linear fade-in/fade-out around a scheduled span of context time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeEnvelope {
    /// Context time where the span starts
    pub start: f64,
    /// Length of the span in seconds
    pub duration: f64,
    /// Ramp length at each edge in seconds
    pub fade: f64,
}

impl FadeEnvelope {
    pub fn new(start: f64, duration: f64, fade: f64) -> Self {
        Self {
            start,
            duration: duration.max(0.0),
            fade: fade.max(0.0),
        }
    }

    /// Envelope value at context time `t`
    ///
    /// Spans shorter than two fades get proportionally shorter ramps so
    /// the envelope still peaks at 1 in the middle.
    pub fn gain_at(&self, t: f64) -> f32 {
        let end = self.start + self.duration;
        if t < self.start || t >= end {
            return 0.0;
        }
        let fade = self.fade.min(self.duration / 2.0);
        if fade <= 0.0 {
            return 1.0;
        }
        let rise = (t - self.start) / fade;
        let fall = (end - t) / fade;
        rise.min(fall).min(1.0) as f32
    }
}

impl Processor for FadeEnvelope {
    fn process(&mut self, block: &mut [Vec<f32>], clock: BlockClock) {
        let frames = block.first().map_or(0, Vec::len);
        for frame in 0..frames {
            let gain = self.gain_at(clock.time_at(frame));
            for channel in block.iter_mut() {
                channel[frame] *= gain;
            }
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gain_stage_scales_and_sanitizes() {
        let mut stage = GainStage::new(0.5);
        let mut block = vec![vec![1.0, -1.0]];
        stage.process(&mut block, BlockClock { start: 0.0, sample_rate: 8000.0 });
        assert_eq!(block[0], vec![0.5, -0.5]);

        stage.set_gain(f32::NAN);
        assert_eq!(stage.gain(), 0.0);
        stage.set_gain(-3.0);
        assert_eq!(stage.gain(), 0.0);
    }

    #[test]
    fn test_fade_shape() {
        let env = FadeEnvelope::new(1.0, 2.0, 0.005);
        assert_eq!(env.gain_at(0.999), 0.0);
        assert_abs_diff_eq!(env.gain_at(1.0), 0.0);
        assert_abs_diff_eq!(env.gain_at(1.0025), 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(env.gain_at(2.0), 1.0);
        assert_abs_diff_eq!(env.gain_at(2.9975), 0.5, epsilon = 1e-4);
        assert_eq!(env.gain_at(3.0), 0.0);
    }

    #[test]
    fn test_short_span_still_peaks() {
        let env = FadeEnvelope::new(0.0, 0.004, 0.005);
        assert_abs_diff_eq!(env.gain_at(0.002), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fade_applies_per_frame() {
        let mut env = FadeEnvelope::new(0.0, 1.0, 0.5);
        let mut block = vec![vec![1.0; 4]];
        env.process(&mut block, BlockClock { start: 0.0, sample_rate: 4.0 });
        assert_eq!(block[0], vec![0.0, 0.5, 1.0, 0.5]);
    }
}
