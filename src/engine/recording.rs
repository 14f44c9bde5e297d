//! Recording ingest
//!
//! A recording session owns a capture stream and a placeholder clip that
//! grows on the selected track while input arrives. The host drives the
//! session with `poll(elapsed)`; every whole `recording_tick` the
//! placeholder's duration and envelope are refreshed and the playhead moves
//! with it. Stopping swaps the placeholder for a clip decoded from the
//! captured bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};

use crate::backend::AudioBackend;
use crate::config::EngineConfig;
use crate::engine::buffer::SampleBuffer;
use crate::engine::waveform;
use crate::error::{MixdeckError, Result};
use crate::state::project::{Clip, ClipId, TrackId};
use crate::state::store::{Command, ProjectStore};

/// Id of the clip shown while a recording is in progress
pub const PLACEHOLDER_CLIP_ID: &str = "temp-recording";

// ============================================================================
// Capture Capability
// ============================================================================

/// An input device that can be opened for capture
pub trait CaptureSource {
    /// Acquire the device; fails when permission is denied or the device
    /// cannot start
    fn open(&mut self) -> Result<Box<dyn CaptureStream>>;
}

/// An open capture
pub trait CaptureStream {
    /// Latest block of time-domain input, for live feedback
    fn monitor(&mut self) -> Vec<f32>;

    /// Stop capturing, release the device and return the encoded audio
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Capture source backed by canned encoded audio
///
/// Used by tests and the CLI. The shared `active` flag reports whether a
/// stream currently holds the device.
#[derive(Debug, Clone)]
pub struct MemoryCapture {
    permission_granted: bool,
    failure: Option<String>,
    recording: Vec<u8>,
    monitor: Vec<f32>,
    active: Arc<AtomicBool>,
}

impl MemoryCapture {
    /// Capture that yields `recording` when finished
    pub fn new(recording: Vec<u8>) -> Self {
        Self {
            permission_granted: true,
            failure: None,
            recording,
            monitor: Vec::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Capture whose permission prompt was refused
    pub fn denied() -> Self {
        Self {
            permission_granted: false,
            ..Self::new(Vec::new())
        }
    }

    /// Capture whose device fails to start
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Block returned by every `monitor` call
    pub fn with_monitor(mut self, block: Vec<f32>) -> Self {
        self.monitor = block;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for MemoryCapture {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CaptureSource for MemoryCapture {
    fn open(&mut self) -> Result<Box<dyn CaptureStream>> {
        if !self.permission_granted {
            return Err(MixdeckError::PermissionDenied);
        }
        if let Some(reason) = &self.failure {
            return Err(MixdeckError::CaptureUnavailable {
                reason: reason.clone(),
            });
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(MixdeckError::CaptureUnavailable {
                reason: "device already in use".to_string(),
            });
        }
        Ok(Box::new(MemoryStream {
            recording: self.recording.clone(),
            monitor: self.monitor.clone(),
            active: Arc::clone(&self.active),
        }))
    }
}

struct MemoryStream {
    recording: Vec<u8>,
    monitor: Vec<f32>,
    active: Arc<AtomicBool>,
}

impl CaptureStream for MemoryStream {
    fn monitor(&mut self) -> Vec<f32> {
        self.monitor.clone()
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.recording))
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Ingester
// ============================================================================

/// Recording lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Finalizing,
}

struct Session {
    track_id: TrackId,
    start_time: f64,
    /// Seconds recorded so far, in whole ticks
    recorded: f64,
    /// Host time not yet converted into ticks
    pending: f64,
    stream: Box<dyn CaptureStream>,
}

/// Drives capture sessions against the project store
pub struct RecordingIngester {
    state: RecordingState,
    session: Option<Session>,
    tick: f64,
    sample_rate: u32,
    envelope_points: usize,
}

impl std::fmt::Debug for RecordingIngester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingIngester")
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("recorded", &self.recorded_duration())
            .finish()
    }
}

impl RecordingIngester {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: RecordingState::Idle,
            session: None,
            tick: config.recording_tick,
            sample_rate: config.sample_rate,
            envelope_points: config.import_waveform_points,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    /// Seconds captured in the current session
    pub fn recorded_duration(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.recorded)
    }

    /// Track the current session records onto
    pub fn target_track(&self) -> Option<&TrackId> {
        self.session.as_ref().map(|s| &s.track_id)
    }

    /// Open the capture device and start a session on the selected track
    ///
    /// On failure nothing changes and the ingester stays idle.
    pub fn start(&mut self, store: &ProjectStore, capture: &mut dyn CaptureSource) -> Result<()> {
        if self.state != RecordingState::Idle {
            return Err(MixdeckError::AlreadyRecording);
        }
        let track_id = store
            .selection()
            .track
            .clone()
            .filter(|id| store.project().track(id).is_some())
            .ok_or(MixdeckError::NoTrackSelected)?;

        let stream = capture.open()?;
        let start_time = store.project().current_time;
        self.session = Some(Session {
            track_id,
            start_time,
            recorded: 0.0,
            pending: 0.0,
            stream,
        });
        self.state = RecordingState::Recording;
        info!("[RECORD] Started at {:.3}s", start_time);
        Ok(())
    }

    /// Feed elapsed host time; returns the number of ticks fired
    pub fn poll(&mut self, elapsed: f64, store: &mut ProjectStore) -> usize {
        if self.state != RecordingState::Recording || !(elapsed > 0.0) {
            return 0;
        }
        let tick = self.tick;
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        session.pending += elapsed;

        let mut fired = 0;
        // Tolerate float drift from summing 0.1 s steps
        while session.pending + 1e-9 >= tick {
            session.pending -= tick;
            session.recorded += tick;
            fired += 1;
        }
        if fired > 0 {
            let block = session.stream.monitor();
            Self::refresh_preview(session, block, self.sample_rate, store);
        }
        fired
    }

    fn refresh_preview(session: &Session, block: Vec<f32>, sample_rate: u32, store: &mut ProjectStore) {
        let placeholder = ClipId::from(PLACEHOLDER_CLIP_ID);
        let envelope: Vec<f32> = block.iter().map(|s| s.abs()).collect();

        if store.project().clip(&placeholder).is_some() {
            store.apply(Command::UpdateClipPreview {
                clip_id: placeholder,
                duration: session.recorded,
                waveform: envelope,
            });
        } else {
            let frames = block.len();
            store.apply(Command::AddClip {
                clip: Clip {
                    id: placeholder,
                    track_id: session.track_id.clone(),
                    audio: Arc::new(SampleBuffer::silence(1, frames, sample_rate)),
                    start_time: session.start_time,
                    duration: session.recorded,
                    source_offset: 0.0,
                    waveform: envelope,
                    name: "Recording...".to_string(),
                },
            });
        }
        store.apply(Command::SetCurrentTime {
            time: session.start_time + session.recorded,
        });
    }

    /// Stop capture and insert the finished clip
    ///
    /// Returns the new clip id, or `None` when the target track was removed
    /// during the session and the take was discarded.
    pub fn stop(&mut self, store: &mut ProjectStore, backend: &dyn AudioBackend) -> Result<Option<ClipId>> {
        if self.state != RecordingState::Recording {
            return Err(MixdeckError::NotRecording);
        }
        let Some(session) = self.session.take() else {
            self.state = RecordingState::Idle;
            return Err(MixdeckError::NotRecording);
        };
        self.state = RecordingState::Finalizing;

        let result = Self::finalize(session, store, backend, self.envelope_points);
        self.state = RecordingState::Idle;
        result
    }

    fn finalize(
        session: Session,
        store: &mut ProjectStore,
        backend: &dyn AudioBackend,
        envelope_points: usize,
    ) -> Result<Option<ClipId>> {
        store.apply(Command::RemoveClip {
            clip_id: ClipId::from(PLACEHOLDER_CLIP_ID),
        });

        let recorded = session.recorded;
        let track_id = session.track_id;
        let bytes = session.stream.finish()?;
        let audio = backend.decode(&bytes)?;
        if audio.is_empty() {
            return Err(MixdeckError::EmptyAudio);
        }

        if store.project().track(&track_id).is_none() {
            warn!("[RECORD] Track {} was removed while recording; take discarded", track_id);
            return Ok(None);
        }

        let clip_id = ClipId::generate();
        let start_time = store.project().current_time - recorded;
        let clip = Clip {
            id: clip_id.clone(),
            track_id,
            start_time,
            duration: audio.duration_secs(),
            source_offset: 0.0,
            waveform: waveform::import_envelope(&audio, envelope_points),
            name: format!("Recording {}", Local::now().format("%H:%M:%S")),
            audio: Arc::new(audio),
        };
        store.apply(Command::AddClip { clip });
        debug!("[RECORD] Finalized {} ({:.3}s recorded)", clip_id, recorded);
        Ok(Some(clip_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::engine::io;
    use approx::assert_abs_diff_eq;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 8000,
            ..EngineConfig::default()
        }
    }

    fn take_bytes(seconds: f32) -> Vec<u8> {
        io::encode_pcm16(&io::generate_test_tone(440.0, seconds, 8000)).unwrap()
    }

    fn store_with_track() -> (ProjectStore, TrackId) {
        let mut store = ProjectStore::new("rec", &config());
        let id = TrackId::from("track-1");
        store.apply(Command::AddTrack { id: id.clone() });
        (store, id)
    }

    #[test]
    fn test_start_requires_selected_track() {
        let mut store = ProjectStore::new("rec", &config());
        let mut recorder = RecordingIngester::new(&config());
        let mut capture = MemoryCapture::new(take_bytes(0.5));
        let err = recorder.start(&store, &mut capture).unwrap_err();
        assert!(matches!(err, MixdeckError::NoTrackSelected));
        assert_eq!(recorder.state(), RecordingState::Idle);

        store.apply(Command::AddTrack { id: TrackId::from("t") });
        recorder.start(&store, &mut capture).unwrap();
        assert!(recorder.is_recording());
        assert!(capture.is_active());
    }

    #[test]
    fn test_denied_permission_stays_idle() {
        let (store, _) = store_with_track();
        let mut recorder = RecordingIngester::new(&config());
        let err = recorder.start(&store, &mut MemoryCapture::denied()).unwrap_err();
        assert!(matches!(err, MixdeckError::PermissionDenied));
        assert_eq!(recorder.state(), RecordingState::Idle);

        let err = recorder
            .start(&store, &mut MemoryCapture::unavailable("no input"))
            .unwrap_err();
        assert_eq!(err.error_code(), "CAPTURE_UNAVAILABLE");
    }

    #[test]
    fn test_ticks_grow_placeholder_and_move_playhead() {
        let (mut store, track) = store_with_track();
        let mut recorder = RecordingIngester::new(&config());
        let mut capture = MemoryCapture::new(take_bytes(0.5)).with_monitor(vec![-0.5, 0.25]);
        recorder.start(&store, &mut capture).unwrap();

        assert_eq!(recorder.poll(0.05, &mut store), 0);
        assert_eq!(recorder.poll(0.25, &mut store), 3);

        let placeholder = store.project().clip(&ClipId::from(PLACEHOLDER_CLIP_ID)).unwrap();
        assert_eq!(placeholder.track_id, track);
        assert_abs_diff_eq!(placeholder.duration, 0.3, epsilon = 1e-9);
        assert_eq!(placeholder.waveform, vec![0.5, 0.25]);
        assert_abs_diff_eq!(store.project().current_time, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_stop_replaces_placeholder_with_take() {
        let (mut store, track) = store_with_track();
        let backend = SoftwareBackend::new(8000, 128);
        let mut recorder = RecordingIngester::new(&config());
        let mut capture = MemoryCapture::new(take_bytes(0.5)).with_monitor(vec![0.1; 4]);
        recorder.start(&store, &mut capture).unwrap();
        recorder.poll(0.5, &mut store);

        let clip_id = recorder.stop(&mut store, &backend).unwrap().unwrap();
        assert_eq!(recorder.state(), RecordingState::Idle);
        assert!(!capture.is_active());

        let project = store.project();
        assert!(project.clip(&ClipId::from(PLACEHOLDER_CLIP_ID)).is_none());
        let clip = project.clip(&clip_id).unwrap();
        assert_eq!(clip.track_id, track);
        assert_abs_diff_eq!(clip.start_time, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(clip.duration, 0.5, epsilon = 1e-9);
        assert!(clip.name.starts_with("Recording "));
        assert_eq!(project.tracks[0].clips.len(), 1);
    }

    #[test]
    fn test_take_discarded_when_track_removed() {
        let (mut store, track) = store_with_track();
        let backend = SoftwareBackend::new(8000, 128);
        let mut recorder = RecordingIngester::new(&config());
        let mut capture = MemoryCapture::new(take_bytes(0.2));
        recorder.start(&store, &mut capture).unwrap();
        recorder.poll(0.2, &mut store);

        store.apply(Command::RemoveTrack { track_id: track });
        assert_eq!(recorder.stop(&mut store, &backend).unwrap(), None);
        assert_eq!(store.project().clips().count(), 0);
        assert!(!capture.is_active());
    }

    #[test]
    fn test_stop_without_session() {
        let (mut store, _) = store_with_track();
        let backend = SoftwareBackend::new(8000, 128);
        let mut recorder = RecordingIngester::new(&config());
        let err = recorder.stop(&mut store, &backend).unwrap_err();
        assert!(matches!(err, MixdeckError::NotRecording));
    }
}
