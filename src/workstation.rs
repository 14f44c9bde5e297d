//! Workstation facade
//!
//! The single entry point the UI layer talks to. It owns the project store
//! and the engine parts around it, turns each operation into a store
//! `Command`, and routes the resulting `Change` to the transport so live
//! playback follows the project:
//! - routing changes retarget live gain stages in place
//! - removed clips and tracks release only their own voices
//! - a cross-track move tears down and restarts once the backend acks
//! - an effect chain change rebuilds playback from the current position

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::backend::{AudioBackend, SoftwareBackend};
use crate::config::EngineConfig;
use crate::engine::buffer::SampleBuffer;
use crate::engine::export::{self, ExportRenderer};
use crate::engine::recording::{CaptureSource, MemoryCapture, RecordingIngester, RecordingState};
use crate::engine::transport::{TransportScheduler, TransportState};
use crate::engine::waveform;
use crate::error::{MixdeckError, Result};
use crate::state::{
    Change, Clip, ClipId, Command, Effect, EffectId, EffectKind, EffectParams, EffectPatch,
    Project, ProjectStore, Selection, TrackId,
};

/// Name given to fresh projects
pub const DEFAULT_PROJECT_NAME: &str = "Untitled Project";

/// Engine facade over a live backend
pub struct Workstation<B: AudioBackend = SoftwareBackend> {
    config: EngineConfig,
    store: ProjectStore,
    transport: TransportScheduler,
    recorder: RecordingIngester,
    exporter: ExportRenderer,
    backend: B,
    capture: Box<dyn CaptureSource>,
}

impl Workstation<SoftwareBackend> {
    /// Workstation on the in-process backend with no capture device
    pub fn new(config: EngineConfig) -> Result<Self> {
        let backend = SoftwareBackend::new(config.sample_rate, config.render_quantum);
        Self::with_backend(config, backend)
    }
}

impl<B: AudioBackend> Workstation<B> {
    pub fn with_backend(config: EngineConfig, backend: B) -> Result<Self> {
        config.validate()?;
        if backend.sample_rate() != config.sample_rate {
            return Err(MixdeckError::InvalidConfig {
                reason: format!(
                    "backend runs at {} Hz but config asks for {} Hz",
                    backend.sample_rate(),
                    config.sample_rate
                ),
            });
        }
        Ok(Self {
            store: ProjectStore::new(DEFAULT_PROJECT_NAME, &config),
            transport: TransportScheduler::new(&config),
            recorder: RecordingIngester::new(&config),
            exporter: ExportRenderer::new(&config),
            capture: Box::new(MemoryCapture::unavailable("no capture device configured")),
            backend,
            config,
        })
    }

    /// Replace the capture device used by `start_recording`
    pub fn with_capture(mut self, capture: impl CaptureSource + 'static) -> Self {
        self.capture = Box::new(capture);
        self
    }

    // ========================================================================
    // Read Access
    // ========================================================================

    /// Immutable snapshot of the current project
    pub fn snapshot(&self) -> Arc<Project> {
        self.store.snapshot()
    }

    pub fn project(&self) -> &Project {
        self.store.project()
    }

    pub fn selection(&self) -> &Selection {
        self.store.selection()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder.state()
    }

    /// Number of clips with live backend voices
    pub fn live_voice_count(&self) -> usize {
        self.transport.voice_count()
    }

    pub fn transport(&self) -> &TransportScheduler {
        &self.transport
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Direct backend access, e.g. to render the software backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Waveform of a clip's visible span at the current zoom
    pub fn display_envelope(&self, clip_id: &ClipId) -> Option<Vec<f32>> {
        let project = self.store.project();
        let clip = project.clip(clip_id)?;
        let points = waveform::display_point_count(
            project.zoom,
            self.config.display_base_points,
            self.config.display_max_points,
        );
        Some(waveform::display_envelope(clip, points))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(&mut self, command: Command) -> Result<Change> {
        let applied = self.store.apply(command);
        self.react(&applied.change)?;
        Ok(applied.change)
    }

    /// Keep live playback consistent with a project change
    fn react(&mut self, change: &Change) -> Result<()> {
        let project = self.store.snapshot();
        let backend: &mut dyn AudioBackend = &mut self.backend;
        match change {
            Change::TrackRemoved { clip_ids, .. } => {
                self.transport.on_track_removed(clip_ids, backend);
                self.transport.refresh_all_routing(&project, backend);
            }
            Change::RoutingChanged { track_id } => {
                self.transport.refresh_routing(&project, track_id, backend);
            }
            Change::SoloChanged { .. } => {
                self.transport.refresh_all_routing(&project, backend);
            }
            Change::ClipRemoved { clip_id, .. } => {
                self.transport.on_clip_removed(clip_id, backend);
            }
            Change::ClipMoved {
                cross_track: true, ..
            } => {
                self.transport.on_cross_track_move(backend);
            }
            Change::EffectsChanged { .. } => {
                self.transport.restart(&project, backend)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn set_playhead(&mut self, time: f64, playing: bool) {
        self.store.apply(Command::SetCurrentTime { time });
        self.store.apply(Command::SetPlaying { playing });
    }

    // ========================================================================
    // Project
    // ========================================================================

    /// Discard the current project and start an empty one
    pub fn create_project(&mut self, name: impl Into<String>) -> Result<Change> {
        if self.recorder.is_recording() {
            return Err(MixdeckError::AlreadyRecording);
        }
        self.transport.stop(&mut self.backend);
        self.dispatch(Command::CreateProject { name: name.into() })
    }

    pub fn rename_project(&mut self, name: impl Into<String>) -> Result<Change> {
        self.dispatch(Command::RenameProject { name: name.into() })
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Append a track and select it
    pub fn add_track(&mut self) -> Result<TrackId> {
        let id = TrackId::generate();
        self.dispatch(Command::AddTrack { id: id.clone() })?;
        Ok(id)
    }

    pub fn remove_track(&mut self, track_id: &TrackId) -> Result<Change> {
        self.dispatch(Command::RemoveTrack {
            track_id: track_id.clone(),
        })
    }

    pub fn update_track_name(&mut self, track_id: &TrackId, name: impl Into<String>) -> Result<Change> {
        self.dispatch(Command::RenameTrack {
            track_id: track_id.clone(),
            name: name.into(),
        })
    }

    pub fn update_track_volume(&mut self, track_id: &TrackId, volume: f32) -> Result<Change> {
        self.dispatch(Command::SetTrackVolume {
            track_id: track_id.clone(),
            volume,
        })
    }

    pub fn update_track_color(&mut self, track_id: &TrackId, color: impl Into<String>) -> Result<Change> {
        self.dispatch(Command::SetTrackColor {
            track_id: track_id.clone(),
            color: color.into(),
        })
    }

    pub fn toggle_track_mute(&mut self, track_id: &TrackId) -> Result<Change> {
        self.dispatch(Command::ToggleMute {
            track_id: track_id.clone(),
        })
    }

    pub fn toggle_track_solo(&mut self, track_id: &TrackId) -> Result<Change> {
        self.dispatch(Command::ToggleSolo {
            track_id: track_id.clone(),
        })
    }

    pub fn select_track(&mut self, track_id: Option<&TrackId>) -> Result<Change> {
        self.dispatch(Command::SelectTrack {
            track_id: track_id.cloned(),
        })
    }

    // ========================================================================
    // Clips
    // ========================================================================

    /// Place decoded audio on a track
    ///
    /// Returns `None` when the track does not exist or the audio is empty.
    pub fn add_clip(
        &mut self,
        track_id: &TrackId,
        audio: SampleBuffer,
        start_time: f64,
        name: impl Into<String>,
    ) -> Result<Option<ClipId>> {
        let id = ClipId::generate();
        let clip = Clip {
            id: id.clone(),
            track_id: track_id.clone(),
            start_time,
            duration: audio.duration_secs(),
            source_offset: 0.0,
            waveform: waveform::import_envelope(&audio, self.config.import_waveform_points),
            name: name.into(),
            audio: Arc::new(audio),
        };
        let change = self.dispatch(Command::AddClip { clip })?;
        Ok((!change.is_none()).then_some(id))
    }

    /// Decode encoded audio and place it on a track
    ///
    /// # Errors
    /// * `Decode` / `EmptyAudio` - the bytes are not usable audio; the
    ///   project is left untouched
    pub fn import_audio(
        &mut self,
        track_id: &TrackId,
        bytes: &[u8],
        start_time: f64,
        name: impl Into<String>,
    ) -> Result<Option<ClipId>> {
        let audio = self.backend.decode(bytes)?;
        if audio.is_empty() {
            return Err(MixdeckError::EmptyAudio);
        }
        self.add_clip(track_id, audio, start_time, name)
    }

    pub fn remove_clip(&mut self, clip_id: &ClipId) -> Result<Change> {
        self.dispatch(Command::RemoveClip {
            clip_id: clip_id.clone(),
        })
    }

    pub fn move_clip(&mut self, clip_id: &ClipId, target: &TrackId, start_time: f64) -> Result<Change> {
        self.dispatch(Command::MoveClip {
            clip_id: clip_id.clone(),
            target: target.clone(),
            start_time,
        })
    }

    pub fn trim_clip(&mut self, clip_id: &ClipId, start_offset: f64, end_offset: f64) -> Result<Change> {
        self.dispatch(Command::TrimClip {
            clip_id: clip_id.clone(),
            start_offset,
            end_offset,
        })
    }

    /// Split a clip in two at a timeline position
    ///
    /// Returns the ids of the two halves, or `None` when `at_time` is not
    /// strictly inside the clip.
    pub fn split_clip(&mut self, clip_id: &ClipId, at_time: f64) -> Result<Option<(ClipId, ClipId)>> {
        let first = ClipId::generate();
        let second = ClipId::generate();
        let change = self.dispatch(Command::SplitClip {
            clip_id: clip_id.clone(),
            at_time,
            first: first.clone(),
            second: second.clone(),
        })?;
        Ok((!change.is_none()).then_some((first, second)))
    }

    pub fn select_clip(&mut self, clip_id: &ClipId, add_to_selection: bool) -> Result<Change> {
        self.dispatch(Command::SelectClip {
            clip_id: clip_id.clone(),
            add_to_selection,
        })
    }

    pub fn clear_clip_selection(&mut self) -> Result<Change> {
        self.dispatch(Command::ClearClipSelection)
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<Change> {
        self.dispatch(Command::SetZoom { zoom })
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub fn play(&mut self) -> Result<()> {
        let project = self.store.snapshot();
        self.transport.play(&project, &mut self.backend)?;
        if self.transport.is_playing() {
            self.store.apply(Command::SetPlaying { playing: true });
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.recorder.is_recording() {
            warn!("pause ignored while recording");
            return;
        }
        let time = self
            .transport
            .pause(&mut self.backend)
            .unwrap_or(self.store.project().current_time);
        self.set_playhead(time, false);
    }

    pub fn stop(&mut self) {
        if self.recorder.is_recording() {
            warn!("stop ignored while recording; use stop_recording");
            return;
        }
        self.transport.stop(&mut self.backend);
        self.set_playhead(0.0, false);
    }

    /// Move the playhead; the transport always ends up paused
    ///
    /// The playhead moves and `is_playing` clears even when the backend
    /// fails to reset; that failure is returned afterwards.
    pub fn seek_to(&mut self, time: f64) -> Result<()> {
        if self.recorder.is_recording() {
            warn!("seek ignored while recording");
            return Ok(());
        }
        let reset = self.transport.seek(&mut self.backend);
        self.set_playhead(time, false);
        reset
    }

    /// Advance the engine by `elapsed` seconds of host time
    ///
    /// Drains backend events, moves the playhead from the backend clock
    /// while playing and drives recording ticks.
    pub fn tick(&mut self, elapsed: f64) -> Result<()> {
        for event in self.backend.poll_events() {
            let project = self.store.snapshot();
            self.transport
                .on_backend_event(event, &project, &mut self.backend)?;
        }

        if let Some(time) = self.transport.tick(self.store.project(), &mut self.backend) {
            let playing = self.transport.is_playing();
            self.set_playhead(time, playing);
        }

        self.recorder.poll(elapsed, &mut self.store);
        Ok(())
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Start capturing onto the selected track
    ///
    /// # Errors
    /// * `NoTrackSelected`, `PermissionDenied`, `CaptureUnavailable`,
    ///   `AlreadyRecording` - recording stays idle
    pub fn start_recording(&mut self) -> Result<()> {
        self.recorder.start(&self.store, self.capture.as_mut())?;
        self.transport.begin_recording(&mut self.backend);
        self.store.apply(Command::SetPlaying { playing: false });
        Ok(())
    }

    /// Stop capturing and insert the take
    pub fn stop_recording(&mut self) -> Result<Option<ClipId>> {
        let result = self.recorder.stop(&mut self.store, &self.backend);
        self.transport.end_recording();
        if let Ok(Some(clip_id)) = &result {
            info!("recorded clip {}", clip_id);
        }
        result
    }

    // ========================================================================
    // Effects
    // ========================================================================

    /// Append an effect with default parameters to a track's chain
    pub fn add_effect(&mut self, track_id: &TrackId, kind: EffectKind) -> Result<Option<EffectId>> {
        let id = EffectId::generate();
        let effect = Effect::new(id.clone(), EffectParams::defaults(kind));
        let change = self.dispatch(Command::AddEffect {
            track_id: track_id.clone(),
            effect,
        })?;
        Ok((!change.is_none()).then_some(id))
    }

    pub fn update_effect_params(
        &mut self,
        track_id: &TrackId,
        effect_id: &EffectId,
        patch: EffectPatch,
    ) -> Result<Change> {
        self.dispatch(Command::UpdateEffect {
            track_id: track_id.clone(),
            effect_id: effect_id.clone(),
            patch,
        })
    }

    pub fn remove_effect(&mut self, track_id: &TrackId, effect_id: &EffectId) -> Result<Change> {
        self.dispatch(Command::RemoveEffect {
            track_id: track_id.clone(),
            effect_id: effect_id.clone(),
        })
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Render the project offline and encode it as 16-bit stereo WAV
    pub fn export_project(&mut self) -> Result<Vec<u8>> {
        let project = self.store.snapshot();
        self.exporter.export(&project, &self.backend)
    }

    /// Export and write the WAV to `path`
    pub fn export_to_path(&mut self, path: &Path) -> Result<()> {
        let bytes = self.export_project()?;
        export::export_to_path(&bytes, path)
    }
}

impl<B: AudioBackend> std::fmt::Debug for Workstation<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workstation")
            .field("project", &self.store.project().name)
            .field("transport", &self.transport.state())
            .field("recording", &self.recorder.state())
            .field("voices", &self.transport.voice_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, BackendEvent, BackendResult, Destination, OfflineContext, SourceSchedule,
        StageGraph, StageId, StageSpec, TeardownToken,
    };
    use crate::engine::io;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 8192,
            render_quantum: 512,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_rejects_mismatched_backend_rate() {
        let err = Workstation::with_backend(config(), SoftwareBackend::new(44100, 512)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_import_decode_failure_leaves_project_untouched() {
        let mut ws = Workstation::new(config()).unwrap();
        let track = ws.add_track().unwrap();
        let before = ws.snapshot();
        let err = ws.import_audio(&track, b"not audio", 0.0, "bad").unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
        assert_eq!(*ws.snapshot(), *before);
    }

    #[test]
    fn test_import_places_clip_with_envelope() {
        let mut ws = Workstation::new(config()).unwrap();
        let track = ws.add_track().unwrap();
        let bytes = io::encode_pcm16(&io::generate_test_tone(220.0, 1.0, 8192)).unwrap();
        let id = ws.import_audio(&track, &bytes, 2.0, "tone").unwrap().unwrap();

        let clip = ws.project().clip(&id).unwrap().clone();
        assert_eq!(clip.start_time, 2.0);
        assert_eq!(clip.duration, 1.0);
        assert_eq!(clip.waveform.len(), ws.config().import_waveform_points);
        assert_eq!(ws.selection().clips, vec![id.clone()]);
        assert!(ws.display_envelope(&id).is_some());
    }

    /// Software backend whose context cannot be reopened
    struct StuckBackend(SoftwareBackend);

    impl StageGraph for StuckBackend {
        fn sample_rate(&self) -> u32 {
            self.0.sample_rate()
        }

        fn create_stage(&mut self, spec: StageSpec) -> BackendResult<StageId> {
            self.0.create_stage(spec)
        }

        fn connect(&mut self, from: StageId, to: Destination) -> BackendResult {
            self.0.connect(from, to)
        }

        fn start_source(&mut self, source: StageId, schedule: SourceSchedule) -> BackendResult {
            self.0.start_source(source, schedule)
        }
    }

    impl AudioBackend for StuckBackend {
        fn now(&self) -> f64 {
            self.0.now()
        }

        fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer> {
            self.0.decode(bytes)
        }

        fn set_gain(&mut self, stage: StageId, gain: f32) -> BackendResult {
            self.0.set_gain(stage, gain)
        }

        fn release(&mut self, stage: StageId) -> BackendResult {
            self.0.release(stage)
        }

        fn suspend(&mut self) -> BackendResult {
            self.0.suspend()
        }

        fn resume(&mut self) -> BackendResult {
            self.0.resume()
        }

        fn reset(&mut self) -> BackendResult {
            Err(BackendError::new("context could not be reopened"))
        }

        fn request_teardown_ack(&mut self) -> TeardownToken {
            self.0.request_teardown_ack()
        }

        fn poll_events(&mut self) -> Vec<BackendEvent> {
            self.0.poll_events()
        }

        fn offline_context(&self, frames: usize) -> Box<dyn OfflineContext> {
            self.0.offline_context(frames)
        }
    }

    #[test]
    fn test_failed_seek_still_stops_playback() {
        let backend = StuckBackend(SoftwareBackend::new(8192, 512));
        let mut ws = Workstation::with_backend(config(), backend).unwrap();
        let track = ws.add_track().unwrap();
        let bytes = io::encode_pcm16(&io::generate_test_tone(220.0, 1.0, 8192)).unwrap();
        ws.import_audio(&track, &bytes, 0.0, "tone").unwrap().unwrap();
        ws.play().unwrap();
        assert!(ws.project().is_playing);

        let err = ws.seek_to(0.5).unwrap_err();
        assert_eq!(err.error_code(), "BACKEND_ERROR");
        assert_eq!(ws.transport_state(), TransportState::Paused);
        assert!(!ws.project().is_playing);
        assert_eq!(ws.project().current_time, 0.5);
    }

    #[test]
    fn test_recording_without_device_fails() {
        let mut ws = Workstation::new(config()).unwrap();
        ws.add_track().unwrap();
        let err = ws.start_recording().unwrap_err();
        assert_eq!(err.error_code(), "CAPTURE_UNAVAILABLE");
        assert_eq!(ws.recording_state(), RecordingState::Idle);
    }
}
