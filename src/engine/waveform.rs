//! Amplitude envelopes for waveform display
//!
//! Envelopes are block means of |x|. Clips store one computed at import;
//! the display path recomputes them per zoom level and never persists them.

use crate::engine::buffer::SampleBuffer;
use crate::state::project::Clip;

/// Block-mean absolute amplitude of `samples` at `points` resolution
///
/// `points` is capped at the sample count, so the result never holds more
/// entries than the input. Empty input yields an empty envelope.
pub fn summarize(samples: &[f32], points: usize) -> Vec<f32> {
    let points = points.min(samples.len());
    if points == 0 {
        return Vec::new();
    }

    let block = samples.len() / points;
    (0..points)
        .map(|i| {
            let start = i * block;
            let sum: f32 = samples[start..start + block].iter().map(|s| s.abs()).sum();
            sum / block as f32
        })
        .collect()
}

/// Envelope stored on a clip when it is created
pub fn import_envelope(buffer: &SampleBuffer, points: usize) -> Vec<f32> {
    if buffer.num_channels() == 0 {
        return Vec::new();
    }
    summarize(buffer.channel(0), points)
}

/// Display resolution for a zoom factor
///
/// Grows linearly with zoom above 0.5, bounded by `[base, max]`.
pub fn display_point_count(zoom: f64, base: usize, max: usize) -> usize {
    let scaled = base as f64 * (2.0 * zoom).max(1.0);
    (scaled.round() as usize).clamp(base, max.max(base))
}

/// Envelope of the part of a clip that is actually on the timeline
///
/// Reads channel 0 from `source_offset` for `duration` seconds; leading
/// silence from a negative offset is not drawn.
pub fn display_envelope(clip: &Clip, points: usize) -> Vec<f32> {
    let audio = &clip.audio;
    if audio.num_channels() == 0 {
        return Vec::new();
    }
    let rate = audio.sample_rate() as f64;
    let start = (clip.source_offset.max(0.0) * rate) as usize;
    let end = ((clip.source_offset + clip.duration) * rate).max(0.0) as usize;
    let data = audio.channel(0);
    let end = end.min(data.len());
    let start = start.min(end);
    summarize(&data[start..end], points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::project::{ClipId, TrackId};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn test_block_means() {
        let samples = [1.0, -1.0, 0.5, -0.5, 0.0, 0.0];
        let env = summarize(&samples, 3);
        assert_eq!(env, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_points_capped_at_length() {
        let env = summarize(&[0.25, -0.75], 5000);
        assert_eq!(env.len(), 2);
        assert_relative_eq!(env[1], 0.75);
        assert!(summarize(&[], 10).is_empty());
    }

    #[test]
    fn test_remainder_samples_are_dropped() {
        // 7 samples into 3 points: block of 2, last sample ignored
        let env = summarize(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 9.0], 3);
        assert_eq!(env, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_display_point_count_scales_with_zoom() {
        assert_eq!(display_point_count(0.1, 2000, 20000), 2000);
        assert_eq!(display_point_count(0.5, 2000, 20000), 2000);
        assert_eq!(display_point_count(2.0, 2000, 20000), 8000);
        assert_eq!(display_point_count(10.0, 2000, 20000), 20000);
    }

    #[test]
    fn test_display_envelope_follows_trim() {
        let mut samples = vec![0.0; 100];
        samples[50..].iter_mut().for_each(|s| *s = 1.0);
        let clip = Clip {
            id: ClipId::from("c"),
            track_id: TrackId::from("t"),
            audio: Arc::new(SampleBuffer::from_mono(samples, 100)),
            start_time: 0.0,
            duration: 0.5,
            source_offset: 0.5,
            waveform: Vec::new(),
            name: "c".to_string(),
        };
        let env = display_envelope(&clip, 5);
        assert_eq!(env, vec![1.0; 5]);
    }
}
