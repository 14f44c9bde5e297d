//! Decoded sample data
//!
//! `SampleBuffer` is the immutable, decoded audio a clip points at. Clips
//! share it through an `Arc`; editing never rewrites samples in place, it
//! slices new buffers (split) or moves the clip's window over the data.

use std::ops::Range;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

// ============================================================================
// Sample Buffer
// ============================================================================

/// Planar, immutable audio at its native sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Build a buffer from planar channel data
    ///
    /// Channels shorter than the longest one are zero-padded so every
    /// channel has the same frame count.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in &mut channels {
            channel.resize(frames, 0.0);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// Single-channel buffer
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// All-zero buffer
    pub fn silence(num_channels: usize, num_frames: usize, sample_rate: u32) -> Self {
        Self {
            channels: vec![vec![0.0; num_frames]; num_channels.max(1)],
            sample_rate,
        }
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Native sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds at the native rate
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// True when the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    /// Samples of one channel
    ///
    /// # Panics
    /// Panics if `index >= num_channels()`.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// All channels
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Sample at `frame` of `channel`, mapping mono data onto any channel
    ///
    /// Out-of-range frames read as silence.
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        if self.channels.is_empty() {
            return 0.0;
        }
        let ch = channel.min(self.channels.len() - 1);
        self.channels[ch].get(frame).copied().unwrap_or(0.0)
    }

    /// Copy a frame range into a new buffer with the same rate
    ///
    /// The range is clamped to the available frames.
    pub fn slice_frames(&self, range: Range<usize>) -> SampleBuffer {
        let end = range.end.min(self.num_frames());
        let start = range.start.min(end);
        let channels = self
            .channels
            .iter()
            .map(|ch| ch[start..end].to_vec())
            .collect();
        SampleBuffer {
            channels,
            sample_rate: self.sample_rate,
        }
    }

    /// Peak absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Interleave all channels frame by frame
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.num_frames();
        let num_channels = self.num_channels();
        let mut out = Vec::with_capacity(frames * num_channels);
        for frame in 0..frames {
            for ch in &self.channels {
                out.push(ch[frame]);
            }
        }
        out
    }

    /// Consume the buffer and return its planar data
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_pads_short_channels() {
        let buffer = SampleBuffer::new(vec![vec![1.0, 2.0, 3.0], vec![1.0]], 8000);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.num_frames(), 3);
        assert_eq!(buffer.channel(1), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_duration() {
        let buffer = SampleBuffer::silence(2, 44100, 44100);
        assert_relative_eq!(buffer.duration_secs(), 1.0);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_slice_frames_clamps() {
        let buffer = SampleBuffer::from_mono(vec![0.0, 0.1, 0.2, 0.3], 4);
        let tail = buffer.slice_frames(2..10);
        assert_eq!(tail.channel(0), &[0.2, 0.3]);
        let empty = buffer.slice_frames(6..8);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_mono_sample_maps_to_every_channel() {
        let buffer = SampleBuffer::from_mono(vec![0.5], 8000);
        assert_eq!(buffer.sample(0, 0), 0.5);
        assert_eq!(buffer.sample(1, 0), 0.5);
        assert_eq!(buffer.sample(1, 5), 0.0);
    }

    #[test]
    fn test_interleaved() {
        let buffer = SampleBuffer::new(vec![vec![1.0, 2.0], vec![-1.0, -2.0]], 8000);
        assert_eq!(buffer.interleaved(), vec![1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn test_db_conversions() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-20.0), 0.1, epsilon = 1e-6);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
        assert_relative_eq!(linear_to_db(0.1), -20.0, epsilon = 1e-4);
    }
}
