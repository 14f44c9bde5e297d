//! Audio backend capability
//!
//! The engine never processes audio itself; it describes what it wants
//! (create a stage, wire it, start a source at a context time, change a
//! gain) and a backend carries it out on its own realtime context. Nothing
//! here assumes a call has taken effect by the time it returns: completion
//! is observed through `BackendEvent`s.
//!
//! `StageGraph` is the part shared by the live context and offline render
//! contexts, so the same chain-building code drives both.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dsp::{CompressorSettings, EqSettings, FadeEnvelope, ReverbSettings};
use crate::engine::buffer::SampleBuffer;

pub mod software;

pub use software::SoftwareBackend;

/// Result type for backend operations.
pub type BackendResult<T = ()> = Result<T, BackendError>;

/// Error from a backend operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        BackendError(message.into())
    }
}

/// Handle to one stage in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u64);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// Identifies one teardown acknowledgment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TeardownToken(pub u64);

/// Configuration of a stage to create
#[derive(Debug, Clone)]
pub enum StageSpec {
    /// Plays a buffer once it is started with `start_source`
    Source { buffer: Arc<SampleBuffer> },
    /// Linear gain, adjustable with `set_gain`
    Gain { gain: f32 },
    /// Click-avoidance envelope over a scheduled span
    Fade(FadeEnvelope),
    ThreeBandEq(EqSettings),
    Compressor(CompressorSettings),
    Reverb(ReverbSettings),
}

impl StageSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StageSpec::Source { .. } => "source",
            StageSpec::Gain { .. } => "gain",
            StageSpec::Fade(_) => "fade",
            StageSpec::ThreeBandEq(_) => "eq",
            StageSpec::Compressor(_) => "compressor",
            StageSpec::Reverb(_) => "reverb",
        }
    }
}

/// Where a stage sends its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Stage(StageId),
    /// The context's master output
    Output,
}

/// When and what part of a source buffer to play
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSchedule {
    /// Context time to start at
    pub when: f64,
    /// Seconds into the buffer to start reading from
    pub offset: f64,
    /// How long to play; `None` plays to the end of the buffer
    pub duration: Option<f64>,
}

/// Notifications from the backend's own context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// A started source played out its scheduled span
    SourceEnded(StageId),
    /// Every release issued before the matching request has been processed
    TeardownComplete(TeardownToken),
}

/// Stage creation and wiring, shared by live and offline contexts
pub trait StageGraph {
    /// Context sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Create a stage; it produces nothing until connected
    fn create_stage(&mut self, spec: StageSpec) -> BackendResult<StageId>;

    /// Route `from`'s output; a stage has at most one destination
    fn connect(&mut self, from: StageId, to: Destination) -> BackendResult;

    /// Schedule a source stage to play
    fn start_source(&mut self, source: StageId, schedule: SourceSchedule) -> BackendResult;
}

/// Non-realtime context that renders a fixed number of frames
pub trait OfflineContext: StageGraph {
    /// Render every frame synchronously and return the stereo mix
    fn render(self: Box<Self>) -> BackendResult<SampleBuffer>;
}

/// Live audio backend
pub trait AudioBackend: StageGraph {
    /// Current context time in seconds
    fn now(&self) -> f64;

    /// Decode encoded audio into samples at their native rate
    fn decode(&self, bytes: &[u8]) -> crate::error::Result<SampleBuffer>;

    /// Set the value of a gain stage
    fn set_gain(&mut self, stage: StageId, gain: f32) -> BackendResult;

    /// Stop and disconnect a stage and free it
    fn release(&mut self, stage: StageId) -> BackendResult;

    /// Halt the context clock
    fn suspend(&mut self) -> BackendResult;

    /// Restart the context clock
    fn resume(&mut self) -> BackendResult;

    /// Close the context and open a fresh one; every stage is gone
    /// afterwards and the clock restarts
    fn reset(&mut self) -> BackendResult;

    /// Ask for a `TeardownComplete` once pending releases have landed
    fn request_teardown_ack(&mut self) -> TeardownToken;

    /// Drain queued events
    fn poll_events(&mut self) -> Vec<BackendEvent>;

    /// Offline context at this backend's rate, `frames` long
    fn offline_context(&self, frames: usize) -> Box<dyn OfflineContext>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MixdeckError;

    #[test]
    fn test_backend_error_display_and_conversion() {
        let err = BackendError::new("stage#3 refused to disconnect");
        assert_eq!(err.to_string(), "stage#3 refused to disconnect");

        let boxed: Box<dyn std::error::Error> = Box::new(err.clone());
        assert_eq!(boxed.to_string(), err.0);

        let wrapped: MixdeckError = err.into();
        assert_eq!(wrapped.error_code(), "BACKEND_ERROR");
        assert_eq!(wrapped.to_string(), "Audio backend error: stage#3 refused to disconnect");
    }
}
