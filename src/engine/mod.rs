//! Audio Engine Module
//!
//! Everything that moves audio in or out of the project:
//! - Sample buffers and WAV I/O
//! - Transport scheduling against the live backend
//! - Recording ingest
//! - Offline export
//! - Waveform envelopes

pub mod buffer;
pub mod export;
pub mod io;
pub mod recording;
pub mod transport;
pub mod waveform;

pub use buffer::SampleBuffer;
pub use export::{export_to_path, ExportRenderer};
pub use recording::{
    CaptureSource, CaptureStream, MemoryCapture, RecordingIngester, RecordingState,
    PLACEHOLDER_CLIP_ID,
};
pub use transport::{effective_gain, TeardownReport, TransportScheduler, TransportState, Voice};
