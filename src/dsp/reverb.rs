//! Convolution Reverb
//!
//! The impulse is synthesized: exponentially decaying uniform noise whose
//! length and decay grow with room size. Noise comes from a seeded RNG so
//! two renders of the same project are bit-identical.
//!
//! Convolution is uniformly partitioned overlap-save: the impulse is cut
//! into block-sized partitions, each transformed once, and every input
//! block is multiplied against the whole frequency-domain delay line. This
//! keeps latency at zero and cost per block proportional to impulse length.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::{BlockClock, Processor};
use crate::engine::buffer::SampleBuffer;

// ============================================================================
// Constants
// ============================================================================

/// Impulse length in seconds is `BASE_SECS + SIZE_SECS * size`
const IMPULSE_BASE_SECS: f64 = 0.5;
const IMPULSE_SIZE_SECS: f64 = 2.0;

/// Decay time constant in seconds is `DECAY_BASE + DECAY_SIZE * size`
const DECAY_BASE_SECS: f64 = 0.1;
const DECAY_SIZE_SECS: f64 = 0.4;

/// Loudness calibration applied to normalized impulses (-58 dB)
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

// ============================================================================
// Impulse Synthesis
// ============================================================================

/// Resolved reverb configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReverbSettings {
    /// Stereo impulse response at the context rate
    pub impulse: Arc<SampleBuffer>,
    /// Dry path gain
    pub dry: f32,
    /// Wet path gain
    pub wet: f32,
}

/// Build a stereo decaying-noise impulse
///
/// `size` is the room size as a fraction in [0, 1]. Channel `c` draws its
/// noise from `seed ^ c`.
pub fn generate_impulse(sample_rate: u32, size: f32, seed: u64) -> SampleBuffer {
    let sr = sample_rate as f64;
    let size = size.clamp(0.0, 1.0) as f64;
    let length = (sr * (IMPULSE_BASE_SECS + IMPULSE_SIZE_SECS * size)).floor() as usize;
    let decay = sr * (DECAY_BASE_SECS + DECAY_SIZE_SECS * size);

    let channels = (0..2u64)
        .map(|channel| {
            let mut rng = StdRng::seed_from_u64(seed ^ channel);
            (0..length)
                .map(|i| {
                    let noise: f32 = rng.gen_range(-1.0..1.0);
                    noise * (-(i as f64) / decay).exp() as f32
                })
                .collect()
        })
        .collect();

    SampleBuffer::new(channels, sample_rate)
}

/// Scale that brings an impulse to calibrated loudness
///
/// Matches the normalization convention of browser convolvers so the wet
/// level does not depend on impulse length.
pub fn normalization_scale(impulse: &SampleBuffer) -> f32 {
    let frames = impulse.num_frames();
    let channels = impulse.num_channels();
    if frames == 0 || channels == 0 {
        return 1.0;
    }

    let energy: f32 = impulse
        .channels()
        .iter()
        .flat_map(|ch| ch.iter())
        .map(|s| s * s)
        .sum();
    let power = (energy / (channels * frames) as f32).sqrt().max(MIN_POWER);

    let mut scale = GAIN_CALIBRATION / power;
    if impulse.sample_rate() > 0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / impulse.sample_rate() as f32;
    }
    scale
}

// ============================================================================
// Partitioned Convolver
// ============================================================================

/// One channel of overlap-save convolution
struct ChannelConvolver {
    /// Spectra of each impulse partition
    partitions: Vec<Vec<Complex<f32>>>,
    /// Frequency-domain delay line of past input blocks
    history: Vec<Vec<Complex<f32>>>,
    /// Slot in `history` holding the newest block
    head: usize,
    /// Previous input block (first half of the overlap-save window)
    previous: Vec<f32>,
}

/// Convolution reverb with dry/wet mix
pub struct ConvolutionReverb {
    block_size: usize,
    dry: f32,
    wet: f32,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    channels: Vec<ChannelConvolver>,
    /// Scratch for the time/frequency transform
    window: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("block_size", &self.block_size)
            .field("dry", &self.dry)
            .field("wet", &self.wet)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl ConvolutionReverb {
    /// Prepare a convolver for blocks of `block_size` frames
    pub fn new(settings: &ReverbSettings, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let fft_size = block_size * 2;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let impulse = &settings.impulse;
        let scale = normalization_scale(impulse);
        let num_partitions = impulse.num_frames().div_ceil(block_size).max(1);

        let channels = (0..2)
            .map(|ch| {
                let response: &[f32] = if impulse.num_channels() == 0 {
                    &[]
                } else {
                    impulse.channel(ch.min(impulse.num_channels() - 1))
                };
                let partitions = (0..num_partitions)
                    .map(|p| {
                        let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                        let start = p * block_size;
                        let end = (start + block_size).min(response.len());
                        if start < end {
                            for (slot, &s) in spectrum.iter_mut().zip(&response[start..end]) {
                                *slot = Complex::new(s * scale, 0.0);
                            }
                        }
                        forward.process(&mut spectrum);
                        spectrum
                    })
                    .collect();
                ChannelConvolver {
                    partitions,
                    history: vec![vec![Complex::new(0.0, 0.0); fft_size]; num_partitions],
                    head: 0,
                    previous: vec![0.0; block_size],
                }
            })
            .collect();

        Self {
            block_size,
            dry: settings.dry,
            wet: settings.wet,
            forward,
            inverse,
            channels,
            window: vec![Complex::new(0.0, 0.0); fft_size],
            accumulator: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Convolve one block of one channel; `chunk` must be `block_size` long
    fn convolve_chunk(&mut self, channel: usize, chunk: &mut [f32]) {
        let n = self.block_size;
        let fft_size = n * 2;
        let conv = &mut self.channels[channel];

        for (slot, &s) in self.window.iter_mut().zip(conv.previous.iter().chain(chunk.iter())) {
            *slot = Complex::new(s, 0.0);
        }
        conv.previous.copy_from_slice(chunk);
        self.forward.process(&mut self.window);

        let count = conv.history.len();
        conv.head = (conv.head + 1) % count;
        conv.history[conv.head].copy_from_slice(&self.window);

        self.accumulator.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (p, partition) in conv.partitions.iter().enumerate() {
            let input = &conv.history[(conv.head + count - p) % count];
            for ((acc, x), h) in self.accumulator.iter_mut().zip(input).zip(partition) {
                *acc += x * h;
            }
        }
        self.inverse.process(&mut self.accumulator);

        let norm = 1.0 / fft_size as f32;
        for (sample, wet) in chunk.iter_mut().zip(&self.accumulator[n..]) {
            *sample = self.dry * *sample + self.wet * wet.re * norm;
        }
    }
}

impl Processor for ConvolutionReverb {
    fn process(&mut self, block: &mut [Vec<f32>], _clock: BlockClock) {
        let n = self.block_size;
        for (channel, samples) in block.iter_mut().enumerate().take(self.channels.len()) {
            for chunk in samples.chunks_mut(n) {
                if chunk.len() == n {
                    self.convolve_chunk(channel, chunk);
                } else {
                    let mut padded = chunk.to_vec();
                    padded.resize(n, 0.0);
                    self.convolve_chunk(channel, &mut padded);
                    chunk.copy_from_slice(&padded[..chunk.len()]);
                }
            }
        }
    }

    fn reset(&mut self) {
        for conv in &mut self.channels {
            conv.previous.iter_mut().for_each(|s| *s = 0.0);
            for spectrum in &mut conv.history {
                spectrum.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            }
            conv.head = 0;
        }
    }
}
