//! Transport Scheduler
//!
//! Turns the project timeline into scheduled backend voices and keeps the
//! playhead in step with the backend clock.
//!
//! Every start goes through a full teardown: live voices are never patched
//! incrementally, except for routing gains (volume/mute/solo) which are
//! retargeted in place. A cross-track move while playing tears down and
//! enters `PendingRestart`; playback only resumes once the backend confirms
//! the teardown, and only if nothing else changed the state meanwhile.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info, warn};

use crate::backend::{
    AudioBackend, BackendEvent, Destination, SourceSchedule, StageId, StageSpec, TeardownToken,
};
use crate::config::EngineConfig;
use crate::dsp::{EffectChainBuilder, FadeEnvelope};
use crate::error::Result;
use crate::state::project::{Clip, ClipId, Project, Track, TrackId};

/// Transport states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// Capture in progress; playback is unavailable
    Recording,
    /// Torn down after a cross-track move, waiting for the backend ack
    PendingRestart(TeardownToken),
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
            TransportState::Paused => write!(f, "Paused"),
            TransportState::Recording => write!(f, "Recording"),
            TransportState::PendingRestart(token) => write!(f, "PendingRestart({})", token.0),
        }
    }
}

/// Gain a track contributes to the live mix
///
/// Any solo silences every non-soloed track; otherwise mute silences the
/// track; otherwise the track's volume applies.
pub fn effective_gain(track: &Track, any_soloed: bool) -> f32 {
    if any_soloed && !track.soloed {
        0.0
    } else if track.muted {
        0.0
    } else {
        track.volume
    }
}

/// Backend handles for one scheduled clip
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub track_id: TrackId,
    pub source: StageId,
    /// Every stage in signal order, source first, routing gain last
    pub stages: Vec<StageId>,
    pub routing_gain: StageId,
}

/// Outcome of a teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub voices: usize,
    pub released: usize,
    /// Releases the backend refused; logged and skipped
    pub faults: usize,
}

/// Where a clip lands relative to a play position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSchedule {
    /// Seconds after the play position at which the clip starts sounding
    pub delay: f64,
    /// Seconds into the sample data to start reading
    pub offset: f64,
    /// Seconds to play
    pub duration: f64,
}

/// Compute how a clip plays when the transport starts at `position`
///
/// Returns `None` when nothing of the clip is left to hear.
pub fn schedule_clip(clip: &Clip, position: f64) -> Option<ClipSchedule> {
    let start_at = clip.start_time.max(position);
    let mut duration = clip.start_time + clip.duration - start_at;
    let mut delay = start_at - position;
    let mut offset = clip.source_offset + (start_at - clip.start_time);

    // Negative offsets are leading silence
    if offset < 0.0 {
        delay -= offset;
        duration += offset;
        offset = 0.0;
    }

    if duration <= 0.0 {
        return None;
    }
    Some(ClipSchedule {
        delay,
        offset,
        duration,
    })
}

/// Playhead anchor: project time `time` corresponded to backend time `clock`
#[derive(Debug, Clone, Copy)]
struct Anchor {
    clock: f64,
    time: f64,
}

/// Playback controller for the live backend
#[derive(Debug)]
pub struct TransportScheduler {
    state: TransportState,
    voices: BTreeMap<ClipId, Voice>,
    chain: EffectChainBuilder,
    fade_duration: f64,
    anchor: Option<Anchor>,
    /// Position to resume from once a pending restart is acknowledged
    restart_at: f64,
}

impl TransportScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: TransportState::Stopped,
            voices: BTreeMap::new(),
            chain: EffectChainBuilder::new(config.sample_rate, config.reverb_seed),
            fade_duration: config.fade_duration,
            anchor: None,
            restart_at: 0.0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, clip_id: &ClipId) -> Option<&Voice> {
        self.voices.get(clip_id)
    }

    pub fn voices(&self) -> impl Iterator<Item = (&ClipId, &Voice)> {
        self.voices.iter()
    }

    /// Playhead position according to the backend clock
    pub fn position(&self, backend: &dyn AudioBackend) -> Option<f64> {
        self.anchor
            .map(|a| a.time + (backend.now() - a.clock).max(0.0))
    }

    // ========================================================================
    // Transport Controls
    // ========================================================================

    /// Start playback from the project's current time
    ///
    /// Ignored while recording.
    pub fn play(&mut self, project: &Project, backend: &mut dyn AudioBackend) -> Result<()> {
        if self.state == TransportState::Recording {
            warn!("[TRANSPORT] Cannot play while recording - stop recording first");
            return Ok(());
        }
        self.start_at(project, project.current_time, backend)
    }

    /// Tear down and pause; returns the playhead position if it was moving
    pub fn pause(&mut self, backend: &mut dyn AudioBackend) -> Option<f64> {
        let position = self.frozen_position(backend);
        self.teardown(backend);
        if let Err(e) = backend.suspend() {
            warn!("[TRANSPORT] Suspend failed: {}", e);
        }
        self.anchor = None;
        self.state = TransportState::Paused;
        debug!("[TRANSPORT] Paused at {:?}", position);
        position
    }

    /// Tear down and stop; the caller rewinds the playhead to 0
    pub fn stop(&mut self, backend: &mut dyn AudioBackend) {
        self.teardown(backend);
        self.anchor = None;
        self.state = TransportState::Stopped;
        info!("[TRANSPORT] Stopped");
    }

    /// Close the backend context and leave the transport paused
    ///
    /// Seeking never resumes playback. The caller moves the playhead.
    pub fn seek(&mut self, backend: &mut dyn AudioBackend) -> Result<()> {
        // reset() drops every stage, so the registry only needs clearing
        let dropped = std::mem::take(&mut self.voices).len();
        self.anchor = None;
        self.state = TransportState::Paused;
        backend.reset()?;
        debug!("[TRANSPORT] Seek reset the backend ({} voices dropped)", dropped);
        Ok(())
    }

    /// Enter recording; any playback is torn down first
    pub fn begin_recording(&mut self, backend: &mut dyn AudioBackend) {
        self.teardown(backend);
        self.anchor = None;
        self.state = TransportState::Recording;
    }

    /// Leave recording for the paused state
    pub fn end_recording(&mut self) {
        if self.state == TransportState::Recording {
            self.state = TransportState::Paused;
        }
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Advance the playhead from the backend clock
    ///
    /// Returns the new position while playing. At the end of the project
    /// the transport stops with the playhead parked at the duration.
    pub fn tick(&mut self, project: &Project, backend: &mut dyn AudioBackend) -> Option<f64> {
        if self.state != TransportState::Playing {
            return None;
        }
        let position = self.position(backend)?;
        if position >= project.duration {
            self.teardown(backend);
            self.anchor = None;
            self.state = TransportState::Stopped;
            info!("[TRANSPORT] Reached end of project at {:.3}s", project.duration);
            return Some(project.duration);
        }
        Some(position)
    }

    /// React to a backend notification
    pub fn on_backend_event(
        &mut self,
        event: BackendEvent,
        project: &Project,
        backend: &mut dyn AudioBackend,
    ) -> Result<()> {
        match event {
            BackendEvent::SourceEnded(source) => {
                let finished = self
                    .voices
                    .iter()
                    .find(|(_, v)| v.source == source)
                    .map(|(id, _)| id.clone());
                if let Some(clip_id) = finished {
                    self.release_voice(&clip_id, backend);
                }
                Ok(())
            }
            BackendEvent::TeardownComplete(token) => {
                if self.state == TransportState::PendingRestart(token) {
                    debug!("[TRANSPORT] Teardown {} acknowledged, restarting", token.0);
                    let at = self.restart_at;
                    self.start_at(project, at, backend)
                } else {
                    debug!("[TRANSPORT] Stale teardown ack {} ignored", token.0);
                    Ok(())
                }
            }
        }
    }

    // ========================================================================
    // Project Change Hooks
    // ========================================================================

    /// A clip moved to another track; restart once the teardown lands
    pub fn on_cross_track_move(&mut self, backend: &mut dyn AudioBackend) {
        if self.state != TransportState::Playing {
            return;
        }
        self.restart_at = self.frozen_position(backend).unwrap_or(0.0);
        self.teardown(backend);
        self.anchor = None;
        let token = backend.request_teardown_ack();
        self.state = TransportState::PendingRestart(token);
        debug!("[TRANSPORT] Cross-track move, awaiting teardown ack {}", token.0);
    }

    /// Rebuild playback from the current position
    ///
    /// Used when a track's effect chain changes mid-playback.
    pub fn restart(&mut self, project: &Project, backend: &mut dyn AudioBackend) -> Result<()> {
        if self.state != TransportState::Playing {
            return Ok(());
        }
        let at = self.frozen_position(backend).unwrap_or(project.current_time);
        self.start_at(project, at, backend)
    }

    /// Retarget live routing gains of one track
    pub fn refresh_routing(&mut self, project: &Project, track_id: &TrackId, backend: &mut dyn AudioBackend) {
        let Some(track) = project.track(track_id) else {
            return;
        };
        let gain = effective_gain(track, project.any_soloed());
        for voice in self.voices.values().filter(|v| &v.track_id == track_id) {
            if let Err(e) = backend.set_gain(voice.routing_gain, gain) {
                warn!("[TRANSPORT] Could not retarget {}: {}", voice.routing_gain, e);
            }
        }
    }

    /// Retarget live routing gains of every track (after a solo change)
    pub fn refresh_all_routing(&mut self, project: &Project, backend: &mut dyn AudioBackend) {
        for track in &project.tracks {
            self.refresh_routing(project, &track.id, backend);
        }
    }

    /// Release the voice of a removed clip
    pub fn on_clip_removed(&mut self, clip_id: &ClipId, backend: &mut dyn AudioBackend) {
        self.release_voice(clip_id, backend);
    }

    /// Release the voices of a removed track's clips
    pub fn on_track_removed(&mut self, clip_ids: &[ClipId], backend: &mut dyn AudioBackend) {
        for clip_id in clip_ids {
            self.release_voice(clip_id, backend);
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Where playback stands, including a restart still waiting for its ack
    fn frozen_position(&self, backend: &dyn AudioBackend) -> Option<f64> {
        match self.state {
            TransportState::Playing => self.position(backend),
            TransportState::PendingRestart(_) => Some(self.restart_at),
            _ => None,
        }
    }

    /// Position a pending restart will resume from
    pub fn restart_at(&self) -> Option<f64> {
        match self.state {
            TransportState::PendingRestart(_) => Some(self.restart_at),
            _ => None,
        }
    }

    fn start_at(&mut self, project: &Project, position: f64, backend: &mut dyn AudioBackend) -> Result<()> {
        self.teardown(backend);
        backend.resume()?;

        let now = backend.now();
        if let Err(e) = self.schedule_all(project, position, now, backend) {
            self.teardown(backend);
            self.anchor = None;
            self.state = TransportState::Stopped;
            return Err(e);
        }

        self.anchor = Some(Anchor {
            clock: now,
            time: position,
        });
        self.state = TransportState::Playing;
        info!(
            "[TRANSPORT] Play from {:.3}s ({} voices)",
            position,
            self.voices.len()
        );
        Ok(())
    }

    fn schedule_all(&mut self, project: &Project, position: f64, now: f64, backend: &mut dyn AudioBackend) -> Result<()> {
        let any_soloed = project.any_soloed();
        let mut clips: Vec<(&Track, &Clip)> = project
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter().map(move |c| (t, c)))
            .collect();
        clips.sort_by(|a, b| a.1.start_time.total_cmp(&b.1.start_time));

        for (track, clip) in clips {
            let Some(schedule) = schedule_clip(clip, position) else {
                continue;
            };
            let voice = self.schedule_voice(track, clip, schedule, now, any_soloed, backend)?;
            self.voices.insert(clip.id.clone(), voice);
        }
        Ok(())
    }

    fn schedule_voice(
        &self,
        track: &Track,
        clip: &Clip,
        schedule: ClipSchedule,
        now: f64,
        any_soloed: bool,
        backend: &mut dyn AudioBackend,
    ) -> Result<Voice> {
        let when = now + schedule.delay;
        let mut stages = Vec::new();

        let source = backend.create_stage(StageSpec::Source {
            buffer: clip.audio.clone(),
        })?;
        stages.push(source);

        let fade = backend.create_stage(StageSpec::Fade(FadeEnvelope::new(
            when,
            schedule.duration,
            self.fade_duration,
        )))?;
        stages.push(fade);
        backend.connect(source, Destination::Stage(fade))?;

        let chain = self.chain.build(&mut *backend, &track.effects)?;
        let mut tail = fade;
        if let (Some(head), Some(last)) = (chain.head(), chain.tail()) {
            backend.connect(fade, Destination::Stage(head))?;
            tail = last;
        }
        stages.extend(chain.stages);

        let routing_gain = backend.create_stage(StageSpec::Gain {
            gain: effective_gain(track, any_soloed),
        })?;
        stages.push(routing_gain);
        backend.connect(tail, Destination::Stage(routing_gain))?;
        backend.connect(routing_gain, Destination::Output)?;

        backend.start_source(
            source,
            SourceSchedule {
                when,
                offset: schedule.offset,
                duration: Some(schedule.duration),
            },
        )?;

        Ok(Voice {
            track_id: track.id.clone(),
            source,
            stages,
            routing_gain,
        })
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release every live voice; never fails
    pub fn teardown(&mut self, backend: &mut dyn AudioBackend) -> TeardownReport {
        let voices = std::mem::take(&mut self.voices);
        let mut report = TeardownReport {
            voices: voices.len(),
            ..Default::default()
        };
        for (clip_id, voice) in voices {
            release_stages(&clip_id, &voice, backend, &mut report);
        }
        if report.faults > 0 {
            warn!(
                "[TRANSPORT] Teardown finished with {} faults ({} stages released)",
                report.faults, report.released
            );
        }
        report
    }

    fn release_voice(&mut self, clip_id: &ClipId, backend: &mut dyn AudioBackend) {
        if let Some(voice) = self.voices.remove(clip_id) {
            let mut report = TeardownReport::default();
            release_stages(clip_id, &voice, backend, &mut report);
        }
    }
}

/// Release a voice's stages output-side first, isolating each failure
fn release_stages(clip_id: &ClipId, voice: &Voice, backend: &mut dyn AudioBackend, report: &mut TeardownReport) {
    for &stage in voice.stages.iter().rev() {
        match backend.release(stage) {
            Ok(()) => report.released += 1,
            Err(e) => {
                report.faults += 1;
                warn!("[TRANSPORT] Failed to release {} of {}: {}", stage, clip_id, e);
            }
        }
    }
}
