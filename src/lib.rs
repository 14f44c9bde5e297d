//! Mixdeck - Multi-track Audio Timeline Engine
//!
//! Mixdeck owns the project state of an audio workstation and drives
//! sample-accurate playback against a pluggable audio backend.
//!
//! # Architecture
//!
//! - `state`: canonical Project/Track/Clip/Effect model, the command-driven
//!   `ProjectStore` and the clip editing operations (move/trim/split)
//! - `dsp`: effect-chain construction and the DSP primitives used by the
//!   in-process backend (biquad EQ, compressor, convolution reverb)
//! - `backend`: the audio backend capability (`AudioBackend`, `StageGraph`)
//!   and the in-process `SoftwareBackend`
//! - `engine`: transport scheduling, recording ingest, offline export,
//!   waveform summaries and WAV I/O
//! - `workstation`: the facade the UI layer talks to

pub mod backend;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod state;
pub mod workstation;

pub use config::EngineConfig;
pub use error::{MixdeckError, Result};
pub use workstation::Workstation;
