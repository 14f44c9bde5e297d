//! WAV decoding and encoding
//!
//! Decoding turns WAV bytes (imports, finished recordings) into a
//! `SampleBuffer` at its native rate; nothing is resampled here, sources
//! resample while they play. Encoding produces the fixed export container:
//! RIFF/WAVE, PCM, 16-bit little-endian, 44-byte header.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::SampleBuffer;
use crate::error::{MixdeckError, Result};

/// Size of the canonical PCM header written by `encode_pcm16`
pub const WAV_HEADER_LEN: usize = 44;

/// Bit depth of exported audio
pub const EXPORT_BITS_PER_SAMPLE: u16 = 16;

/// Decode WAV bytes into planar float samples
///
/// # Errors
/// * `Decode` - if the bytes are not a readable WAV stream or have more
///   than two channels
/// * `EmptyAudio` - if the stream holds no frames
pub fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| MixdeckError::decode("failed to parse WAV header", e))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 || channels > 2 {
        return Err(MixdeckError::Decode {
            reason: format!("{}-channel audio (only mono/stereo supported)", channels),
            source: None,
        });
    }

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.len() < channels {
        return Err(MixdeckError::EmptyAudio);
    }

    let planar = deinterleave(&interleaved, channels);
    Ok(SampleBuffer::new(planar, spec.sample_rate))
}

/// Encode a buffer as 16-bit PCM WAV
///
/// Samples are clamped to [-1, 1] and scaled asymmetrically (negative by
/// 32768, positive by 32767) so both rails are reachable.
pub fn encode_pcm16(buffer: &SampleBuffer) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: EXPORT_BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };

    let data_len = buffer.num_frames() * buffer.num_channels() * 2;
    let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + data_len);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)
            .map_err(|e| MixdeckError::export(format!("failed to write WAV header: {}", e)))?;

        for sample in buffer.interleaved() {
            writer
                .write_sample(quantize_i16(sample))
                .map_err(|e| MixdeckError::export(format!("failed to write samples: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| MixdeckError::export(format!("failed to finalize WAV: {}", e)))?;
    }

    Ok(bytes)
}

/// Quantize one float sample to signed 16-bit
#[inline]
pub fn quantize_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> SampleBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    let samples = (0..num_samples)
        .map(|i| (angular_freq * i as f32).sin())
        .collect();
    SampleBuffer::from_mono(samples, sample_rate)
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from a WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| MixdeckError::decode("failed to read float samples", e)),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(MixdeckError::Decode {
                        reason: format!("{}-bit integer audio", bits_per_sample),
                        source: None,
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| {
                    MixdeckError::decode(format!("failed to read {}-bit samples", bits_per_sample), e)
                })
        }
    }
}

/// De-interleave samples from [L,R,L,R,...] to [[L,L,...], [R,R,...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut result = vec![Vec::with_capacity(frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            result[ch].push(*sample);
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_header_layout() {
        let buffer = SampleBuffer::silence(2, 100, 44100);
        let bytes = encode_pcm16(&buffer).unwrap();

        assert_eq!(bytes.len(), WAV_HEADER_LEN + 100 * 2 * 2);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 1);
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 2);
        assert_eq!(
            u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            44100
        );
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(
            u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]),
            400
        );
    }

    #[test]
    fn test_quantize_rails() {
        assert_eq!(quantize_i16(1.0), 32767);
        assert_eq!(quantize_i16(-1.0), -32768);
        assert_eq!(quantize_i16(3.5), 32767);
        assert_eq!(quantize_i16(-7.0), -32768);
        assert_eq!(quantize_i16(0.0), 0);
    }

    #[test]
    fn test_decode_reads_encoded_stereo() {
        let buffer = SampleBuffer::new(vec![vec![0.5, -0.5], vec![0.25, 0.0]], 22050);
        let bytes = encode_pcm16(&buffer).unwrap();

        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.num_channels(), 2);
        assert_eq!(decoded.num_frames(), 2);
        assert_eq!(decoded.sample_rate(), 22050);
        assert_abs_diff_eq!(decoded.channel(0)[1], -0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(decoded.channel(1)[0], 0.25, epsilon = 1e-4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_wav(b"definitely not audio").unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }

    #[test]
    fn test_decode_rejects_empty_stream() {
        let bytes = encode_pcm16(&SampleBuffer::silence(1, 0, 8000)).unwrap();
        let err = decode_wav(&bytes).unwrap_err();
        assert_eq!(err.error_code(), "EMPTY_AUDIO");
    }

    #[test]
    fn test_generate_test_tone_length() {
        let tone = generate_test_tone(440.0, 0.5, 8000);
        assert_eq!(tone.num_frames(), 4000);
        assert!(tone.peak() > 0.99);
    }
}
