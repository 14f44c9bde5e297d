//! DSP Stage Library
//!
//! Signal processors behind the backend's stages plus the builder that
//! turns a track's effect list into a serial chain of stage specs.
//! Every processor works on planar blocks of a fixed render quantum and
//! implements `Processor` for uniform processing.

mod chain;
mod compressor;
mod eq;
mod gain;
mod reverb;

pub use chain::{
    compressor_settings, eq_settings, reverb_settings, BuiltChain, EffectChainBuilder,
};
pub use compressor::{Compressor, CompressorSettings};
pub use eq::{EqSettings, ThreeBandEq, HIGH_SHELF_HZ, LOW_SHELF_HZ, MID_PEAK_HZ, MID_PEAK_Q};
pub use gain::{FadeEnvelope, GainStage};
pub use reverb::{generate_impulse, ConvolutionReverb, ReverbSettings};

/// Timing of the block being processed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockClock {
    /// Context time of the first frame in seconds
    pub start: f64,
    /// Frames per second
    pub sample_rate: f64,
}

impl BlockClock {
    /// Context time of frame `index` within the block
    #[inline]
    pub fn time_at(&self, index: usize) -> f64 {
        self.start + index as f64 / self.sample_rate
    }
}

/// A processing stage operating in place on planar audio
pub trait Processor: Send {
    /// Process one block in place; every channel has the same length
    fn process(&mut self, block: &mut [Vec<f32>], clock: BlockClock);

    /// Clear internal state (filter memory, envelopes, tails)
    fn reset(&mut self);
}
