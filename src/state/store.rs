//! Command-driven project store
//!
//! `ProjectStore` holds the one mutable `Project` and applies a closed set
//! of `Command`s to it. Every command is a total function over the current
//! snapshot: it either produces a new consistent snapshot or does nothing.
//! Unknown ids are no-ops reported as `Change::None`.
//!
//! Snapshots are copy-on-write: `apply` goes through `Arc::make_mut`, so a
//! snapshot handed out earlier is never mutated underneath its holder.

use std::sync::Arc;

use log::debug;

use super::editor;
use super::effect::{Effect, EffectPatch};
use super::project::{Clip, ClipId, EffectId, Project, Track, TrackId, MAX_ZOOM, MIN_ZOOM};
use crate::config::EngineConfig;

// ============================================================================
// Commands
// ============================================================================

/// Every state mutation the engine supports
///
/// Ids for new entities are generated by the caller so reducing a command
/// stays deterministic.
#[derive(Debug, Clone)]
pub enum Command {
    CreateProject { name: String },
    RenameProject { name: String },

    AddTrack { id: TrackId },
    RemoveTrack { track_id: TrackId },
    RenameTrack { track_id: TrackId, name: String },
    SetTrackVolume { track_id: TrackId, volume: f32 },
    SetTrackColor { track_id: TrackId, color: String },
    ToggleMute { track_id: TrackId },
    ToggleSolo { track_id: TrackId },
    SelectTrack { track_id: Option<TrackId> },

    /// Insert a fully built clip onto `clip.track_id`
    AddClip { clip: Clip },
    RemoveClip { clip_id: ClipId },
    MoveClip { clip_id: ClipId, target: TrackId, start_time: f64 },
    TrimClip { clip_id: ClipId, start_offset: f64, end_offset: f64 },
    SplitClip { clip_id: ClipId, at_time: f64, first: ClipId, second: ClipId },
    /// Live feedback for a clip still being recorded
    UpdateClipPreview { clip_id: ClipId, duration: f64, waveform: Vec<f32> },
    SelectClip { clip_id: ClipId, add_to_selection: bool },
    ClearClipSelection,

    SetZoom { zoom: f64 },
    SetCurrentTime { time: f64 },
    SetPlaying { playing: bool },

    AddEffect { track_id: TrackId, effect: Effect },
    UpdateEffect { track_id: TrackId, effect_id: EffectId, patch: EffectPatch },
    RemoveEffect { track_id: TrackId, effect_id: EffectId },
}

/// What a command did
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Nothing changed (unknown id, out-of-range edit, no-op value)
    None,
    ProjectReset,
    ProjectRenamed,
    TrackAdded { track_id: TrackId },
    TrackRemoved { track_id: TrackId, clip_ids: Vec<ClipId> },
    /// Name or color changed; nothing audible
    TrackUpdated { track_id: TrackId },
    /// Volume or mute changed on one track
    RoutingChanged { track_id: TrackId },
    /// Solo changed; effective gain of every track may differ
    SoloChanged { track_id: TrackId },
    SelectionChanged,
    ClipAdded { clip_id: ClipId },
    ClipRemoved { clip_id: ClipId, track_id: TrackId },
    ClipMoved { clip_id: ClipId, cross_track: bool },
    ClipTrimmed { clip_id: ClipId },
    ClipSplit { original: ClipId, first: ClipId, second: ClipId },
    ClipPreviewUpdated { clip_id: ClipId },
    ZoomChanged,
    PlayheadMoved,
    PlayingChanged,
    EffectsChanged { track_id: TrackId },
}

impl Change {
    pub fn is_none(&self) -> bool {
        matches!(self, Change::None)
    }
}

/// Result of applying a command
#[derive(Debug, Clone)]
pub struct Applied {
    pub snapshot: Arc<Project>,
    pub change: Change,
}

/// Current track and clip selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub track: Option<TrackId>,
    pub clips: Vec<ClipId>,
}

// ============================================================================
// Store
// ============================================================================

/// Owner of the canonical project state
#[derive(Debug)]
pub struct ProjectStore {
    project: Arc<Project>,
    selection: Selection,
    default_duration: f64,
    envelope_points: usize,
}

impl ProjectStore {
    pub fn new(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            project: Arc::new(Project::new(name, config.default_project_duration)),
            selection: Selection::default(),
            default_duration: config.default_project_duration,
            envelope_points: config.import_waveform_points,
        }
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<Project> {
        Arc::clone(&self.project)
    }

    /// Borrow the current project without bumping the refcount
    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Apply one command and return the resulting snapshot
    pub fn apply(&mut self, command: Command) -> Applied {
        let change = self.reduce(command);
        if change.is_none() {
            debug!("command had no effect");
        }
        Applied {
            snapshot: self.snapshot(),
            change,
        }
    }

    fn reduce(&mut self, command: Command) -> Change {
        match command {
            Command::CreateProject { name } => {
                self.project = Arc::new(Project::new(name, self.default_duration));
                self.selection = Selection::default();
                Change::ProjectReset
            }
            Command::RenameProject { name } => {
                Arc::make_mut(&mut self.project).name = name;
                Change::ProjectRenamed
            }

            // Tracks
            Command::AddTrack { id } => {
                if self.project.track(&id).is_some() {
                    return Change::None;
                }
                let project = Arc::make_mut(&mut self.project);
                let name = format!("Track {}", project.tracks.len() + 1);
                project.tracks.push(Track::new(id.clone(), name));
                self.selection.track = Some(id.clone());
                Change::TrackAdded { track_id: id }
            }
            Command::RemoveTrack { track_id } => {
                let Some(track) = self.project.track(&track_id) else {
                    return Change::None;
                };
                let clip_ids: Vec<ClipId> = track.clips.iter().map(|c| c.id.clone()).collect();
                Arc::make_mut(&mut self.project)
                    .tracks
                    .retain(|t| t.id != track_id);
                if self.selection.track.as_ref() == Some(&track_id) {
                    self.selection.track = None;
                }
                self.selection.clips.retain(|id| !clip_ids.contains(id));
                Change::TrackRemoved { track_id, clip_ids }
            }
            Command::RenameTrack { track_id, name } => {
                self.update_track(&track_id, |t| t.name = name)
                    .map_or(Change::None, |_| Change::TrackUpdated { track_id })
            }
            Command::SetTrackColor { track_id, color } => {
                self.update_track(&track_id, |t| t.color = Some(color))
                    .map_or(Change::None, |_| Change::TrackUpdated { track_id })
            }
            Command::SetTrackVolume { track_id, volume } => {
                if !volume.is_finite() {
                    return Change::None;
                }
                self.update_track(&track_id, |t| t.volume = volume.clamp(0.0, 1.0))
                    .map_or(Change::None, |_| Change::RoutingChanged { track_id })
            }
            Command::ToggleMute { track_id } => {
                self.update_track(&track_id, |t| t.muted = !t.muted)
                    .map_or(Change::None, |_| Change::RoutingChanged { track_id })
            }
            Command::ToggleSolo { track_id } => {
                self.update_track(&track_id, |t| t.soloed = !t.soloed)
                    .map_or(Change::None, |_| Change::SoloChanged { track_id })
            }
            Command::SelectTrack { track_id } => {
                if let Some(id) = &track_id {
                    if self.project.track(id).is_none() {
                        return Change::None;
                    }
                }
                self.selection.track = track_id;
                Change::SelectionChanged
            }

            // Clips
            Command::AddClip { mut clip } => {
                if self.project.track(&clip.track_id).is_none()
                    || self.project.clip(&clip.id).is_some()
                    || !(clip.duration > 0.0)
                {
                    return Change::None;
                }
                clip.start_time = if clip.start_time.is_finite() {
                    clip.start_time.max(0.0)
                } else {
                    0.0
                };
                let clip_id = clip.id.clone();
                let project = Arc::make_mut(&mut self.project);
                if let Some(track) = project.track_mut(&clip.track_id) {
                    track.clips.push(clip);
                }
                project.extend_duration();
                self.selection.clips = vec![clip_id.clone()];
                Change::ClipAdded { clip_id }
            }
            Command::RemoveClip { clip_id } => {
                let Some(track_id) = self.project.clip(&clip_id).map(|c| c.track_id.clone())
                else {
                    return Change::None;
                };
                if let Some(track) = Arc::make_mut(&mut self.project).track_mut(&track_id) {
                    track.clips.retain(|c| c.id != clip_id);
                }
                self.selection.clips.retain(|id| id != &clip_id);
                Change::ClipRemoved { clip_id, track_id }
            }
            Command::MoveClip {
                clip_id,
                target,
                start_time,
            } => {
                if self.project.clip(&clip_id).is_none() || self.project.track(&target).is_none() {
                    return Change::None;
                }
                let project = Arc::make_mut(&mut self.project);
                match editor::move_clip(project, &clip_id, &target, start_time) {
                    Some(moved) => Change::ClipMoved {
                        cross_track: moved.is_cross_track(),
                        clip_id,
                    },
                    None => Change::None,
                }
            }
            Command::TrimClip {
                clip_id,
                start_offset,
                end_offset,
            } => {
                let valid = self
                    .project
                    .clip(&clip_id)
                    .and_then(|c| editor::trimmed_bounds(c, start_offset, end_offset))
                    .is_some();
                if !valid {
                    return Change::None;
                }
                let project = Arc::make_mut(&mut self.project);
                if editor::trim_clip(project, &clip_id, start_offset, end_offset) {
                    Change::ClipTrimmed { clip_id }
                } else {
                    Change::None
                }
            }
            Command::SplitClip {
                clip_id,
                at_time,
                first,
                second,
            } => {
                let inside = self
                    .project
                    .clip(&clip_id)
                    .is_some_and(|c| at_time > c.start_time && at_time < c.end_time());
                if !inside {
                    return Change::None;
                }
                let points = self.envelope_points;
                let project = Arc::make_mut(&mut self.project);
                match editor::split_clip(
                    project,
                    &clip_id,
                    at_time,
                    (first.clone(), second.clone()),
                    points,
                ) {
                    Some(_) => {
                        self.selection.clips = vec![second.clone()];
                        Change::ClipSplit {
                            original: clip_id,
                            first,
                            second,
                        }
                    }
                    None => Change::None,
                }
            }
            Command::UpdateClipPreview {
                clip_id,
                duration,
                waveform,
            } => {
                if self.project.clip(&clip_id).is_none() || !(duration > 0.0) {
                    return Change::None;
                }
                let project = Arc::make_mut(&mut self.project);
                if let Some(clip) = project.clip_mut(&clip_id) {
                    clip.duration = duration;
                    clip.waveform = waveform;
                }
                project.extend_duration();
                Change::ClipPreviewUpdated { clip_id }
            }
            Command::SelectClip {
                clip_id,
                add_to_selection,
            } => {
                if self.project.clip(&clip_id).is_none() {
                    return Change::None;
                }
                if !add_to_selection {
                    self.selection.clips = vec![clip_id];
                } else if let Some(pos) = self.selection.clips.iter().position(|id| id == &clip_id)
                {
                    self.selection.clips.remove(pos);
                } else {
                    self.selection.clips.push(clip_id);
                }
                Change::SelectionChanged
            }
            Command::ClearClipSelection => {
                self.selection.clips.clear();
                Change::SelectionChanged
            }

            // Timeline
            Command::SetZoom { zoom } => {
                if !zoom.is_finite() {
                    return Change::None;
                }
                Arc::make_mut(&mut self.project).zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
                Change::ZoomChanged
            }
            Command::SetCurrentTime { time } => {
                if !time.is_finite() {
                    return Change::None;
                }
                let project = Arc::make_mut(&mut self.project);
                project.current_time = time.clamp(0.0, project.duration);
                Change::PlayheadMoved
            }
            Command::SetPlaying { playing } => {
                if self.project.is_playing == playing {
                    return Change::None;
                }
                Arc::make_mut(&mut self.project).is_playing = playing;
                Change::PlayingChanged
            }

            // Effects
            Command::AddEffect { track_id, effect } => {
                let duplicate = self
                    .project
                    .track(&track_id)
                    .map_or(true, |t| t.effect(&effect.id).is_some());
                if duplicate {
                    return Change::None;
                }
                let effect = Effect::new(effect.id, effect.params);
                self.update_track(&track_id, |t| t.effects.push(effect))
                    .map_or(Change::None, |_| Change::EffectsChanged { track_id })
            }
            Command::UpdateEffect {
                track_id,
                effect_id,
                patch,
            } => {
                let Some(current) = self
                    .project
                    .track(&track_id)
                    .and_then(|t| t.effect(&effect_id))
                else {
                    return Change::None;
                };
                let mut updated = current.clone();
                if !updated.apply_patch(&patch) {
                    debug!("effect {} rejected a patch for another effect type", effect_id);
                    return Change::None;
                }
                if &updated == current {
                    return Change::None;
                }
                self.update_track(&track_id, |t| {
                    if let Some(slot) = t.effects.iter_mut().find(|e| e.id == effect_id) {
                        *slot = updated;
                    }
                })
                .map_or(Change::None, |_| Change::EffectsChanged { track_id })
            }
            Command::RemoveEffect {
                track_id,
                effect_id,
            } => {
                let known = self
                    .project
                    .track(&track_id)
                    .is_some_and(|t| t.effect(&effect_id).is_some());
                if !known {
                    return Change::None;
                }
                self.update_track(&track_id, |t| t.effects.retain(|e| e.id != effect_id))
                    .map_or(Change::None, |_| Change::EffectsChanged { track_id })
            }
        }
    }

    /// Mutate one track if it exists
    fn update_track<F>(&mut self, track_id: &TrackId, f: F) -> Option<()>
    where
        F: FnOnce(&mut Track),
    {
        self.project.track(track_id)?;
        let track = Arc::make_mut(&mut self.project).track_mut(track_id)?;
        f(track);
        Some(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::SampleBuffer;
    use crate::state::effect::{EffectParams, EqParams, ParamPatch, ReverbParams};
    use pretty_assertions::assert_eq;

    fn store() -> ProjectStore {
        ProjectStore::new("Untitled", &EngineConfig::default())
    }

    fn clip_on(track_id: &TrackId, id: &str, start: f64, seconds: f64) -> Clip {
        let frames = (seconds * 100.0) as usize;
        Clip {
            id: ClipId::from(id),
            track_id: track_id.clone(),
            audio: Arc::new(SampleBuffer::silence(1, frames, 100)),
            start_time: start,
            duration: seconds,
            source_offset: 0.0,
            waveform: Vec::new(),
            name: id.to_string(),
        }
    }

    fn add_track(store: &mut ProjectStore, id: &str) -> TrackId {
        let id = TrackId::from(id);
        store.apply(Command::AddTrack { id: id.clone() });
        id
    }

    #[test]
    fn test_add_track_names_and_selects() {
        let mut store = store();
        let a = add_track(&mut store, "track-a");
        let b = add_track(&mut store, "track-b");

        let project = store.project();
        assert_eq!(project.tracks[0].name, "Track 1");
        assert_eq!(project.tracks[1].name, "Track 2");
        assert_eq!(project.tracks[1].volume, 1.0);
        assert_eq!(store.selection().track, Some(b));
        assert_ne!(store.selection().track, Some(a));
    }

    #[test]
    fn test_snapshots_are_not_mutated_later() {
        let mut store = store();
        let before = store.snapshot();
        add_track(&mut store, "track-a");
        assert!(before.tracks.is_empty());
        assert_eq!(store.project().tracks.len(), 1);
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut store = store();
        let ghost = TrackId::from("ghost");
        let before = store.snapshot();

        for command in [
            Command::RemoveTrack { track_id: ghost.clone() },
            Command::ToggleMute { track_id: ghost.clone() },
            Command::SetTrackVolume { track_id: ghost.clone(), volume: 0.5 },
            Command::RemoveClip { clip_id: ClipId::from("ghost") },
            Command::SelectClip { clip_id: ClipId::from("ghost"), add_to_selection: false },
        ] {
            assert_eq!(store.apply(command).change, Change::None);
        }
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn test_add_clip_extends_duration_and_selects() {
        let mut store = store();
        let t = add_track(&mut store, "track-a");
        let applied = store.apply(Command::AddClip { clip: clip_on(&t, "clip-a", 58.0, 5.0) });

        assert_eq!(applied.change, Change::ClipAdded { clip_id: ClipId::from("clip-a") });
        assert_eq!(applied.snapshot.duration, 63.0);
        assert_eq!(store.selection().clips, vec![ClipId::from("clip-a")]);
    }

    #[test]
    fn test_remove_track_cascades_selection() {
        let mut store = store();
        let t = add_track(&mut store, "track-a");
        store.apply(Command::AddClip { clip: clip_on(&t, "clip-a", 0.0, 1.0) });

        let applied = store.apply(Command::RemoveTrack { track_id: t.clone() });
        assert_eq!(
            applied.change,
            Change::TrackRemoved { track_id: t, clip_ids: vec![ClipId::from("clip-a")] }
        );
        assert_eq!(store.selection(), &Selection::default());
    }

    #[test]
    fn test_select_clip_toggles_when_adding() {
        let mut store = store();
        let t = add_track(&mut store, "track-a");
        store.apply(Command::AddClip { clip: clip_on(&t, "clip-a", 0.0, 1.0) });
        store.apply(Command::AddClip { clip: clip_on(&t, "clip-b", 2.0, 1.0) });

        let a = ClipId::from("clip-a");
        let b = ClipId::from("clip-b");
        store.apply(Command::SelectClip { clip_id: a.clone(), add_to_selection: true });
        assert_eq!(store.selection().clips, vec![b.clone(), a.clone()]);
        store.apply(Command::SelectClip { clip_id: b.clone(), add_to_selection: true });
        assert_eq!(store.selection().clips, vec![a.clone()]);
        store.apply(Command::SelectClip { clip_id: b.clone(), add_to_selection: false });
        assert_eq!(store.selection().clips, vec![b]);
        store.apply(Command::ClearClipSelection);
        assert!(store.selection().clips.is_empty());
    }

    #[test]
    fn test_zoom_and_playhead_are_clamped() {
        let mut store = store();
        store.apply(Command::SetZoom { zoom: 50.0 });
        assert_eq!(store.project().zoom, 10.0);
        store.apply(Command::SetZoom { zoom: 0.0 });
        assert_eq!(store.project().zoom, 0.1);

        store.apply(Command::SetCurrentTime { time: 500.0 });
        assert_eq!(store.project().current_time, 60.0);
        store.apply(Command::SetCurrentTime { time: -2.0 });
        assert_eq!(store.project().current_time, 0.0);
    }

    #[test]
    fn test_trim_rejection_keeps_snapshot() {
        let mut store = store();
        let t = add_track(&mut store, "track-a");
        store.apply(Command::AddClip { clip: clip_on(&t, "clip-a", 0.0, 1.0) });
        let before = store.snapshot();

        let applied = store.apply(Command::TrimClip {
            clip_id: ClipId::from("clip-a"),
            start_offset: 0.6,
            end_offset: 0.6,
        });
        assert_eq!(applied.change, Change::None);
        assert!(Arc::ptr_eq(&before, &applied.snapshot));
    }

    #[test]
    fn test_effect_order_survives_toggle() {
        let mut store = store();
        let t = add_track(&mut store, "track-a");
        let eq = EffectId::from("fx-eq");
        let reverb = EffectId::from("fx-reverb");
        store.apply(Command::AddEffect {
            track_id: t.clone(),
            effect: Effect::new(eq.clone(), EffectParams::Eq(EqParams::default())),
        });
        store.apply(Command::AddEffect {
            track_id: t.clone(),
            effect: Effect::new(reverb.clone(), EffectParams::Reverb(ReverbParams::default())),
        });

        for enabled in [false, true] {
            store.apply(Command::UpdateEffect {
                track_id: t.clone(),
                effect_id: eq.clone(),
                patch: EffectPatch::enabled(enabled),
            });
        }

        let ids: Vec<_> = store.project().track(&t).unwrap().effects.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![eq, reverb]);
    }

    #[test]
    fn test_mismatched_effect_patch_is_noop() {
        let mut store = store();
        let t = add_track(&mut store, "track-a");
        let fx = EffectId::from("fx-eq");
        store.apply(Command::AddEffect {
            track_id: t.clone(),
            effect: Effect::new(fx.clone(), EffectParams::Eq(EqParams::default())),
        });

        let applied = store.apply(Command::UpdateEffect {
            track_id: t,
            effect_id: fx,
            patch: EffectPatch::params(ParamPatch::Reverb { mix: Some(10.0), size: None }),
        });
        assert_eq!(applied.change, Change::None);
    }

    #[test]
    fn test_create_project_resets_everything() {
        let mut store = store();
        add_track(&mut store, "track-a");
        store.apply(Command::SetZoom { zoom: 3.0 });

        store.apply(Command::CreateProject { name: "Fresh".to_string() });
        let project = store.project();
        assert_eq!(project.name, "Fresh");
        assert!(project.tracks.is_empty());
        assert_eq!(project.duration, 60.0);
        assert_eq!(project.zoom, 1.0);
        assert_eq!(store.selection(), &Selection::default());
    }
}
