//! Clip editing: move, trim and split
//!
//! Each operation takes the project by `&mut` and either leaves it fully
//! consistent or untouched. An unknown id or an out-of-bounds edit is not
//! an error; it returns `None`/`false` and the caller reports a no-op.

use std::sync::Arc;

use log::debug;

use super::project::{Clip, ClipId, Project, TrackId};
use crate::engine::waveform;

/// Result of a successful move
#[derive(Debug, Clone, PartialEq)]
pub struct MovedClip {
    pub from_track: TrackId,
    pub to_track: TrackId,
}

impl MovedClip {
    pub fn is_cross_track(&self) -> bool {
        self.from_track != self.to_track
    }
}

/// Move a clip to `new_start` on `target`
///
/// Negative start times are clamped to 0. Moving onto a different track
/// transfers ownership in one step: the clip is taken out of its source
/// track and pushed onto the target before the function returns.
pub fn move_clip(
    project: &mut Project,
    clip_id: &ClipId,
    target: &TrackId,
    new_start: f64,
) -> Option<MovedClip> {
    if project.track(target).is_none() {
        debug!("move_clip: unknown target track {}", target);
        return None;
    }
    let from_track = project.clip(clip_id)?.track_id.clone();
    let new_start = if new_start.is_finite() { new_start.max(0.0) } else { 0.0 };

    if &from_track == target {
        let clip = project.clip_mut(clip_id)?;
        clip.start_time = new_start;
    } else {
        let source = project.track_mut(&from_track)?;
        let index = source.clips.iter().position(|c| &c.id == clip_id)?;
        let mut clip = source.clips.remove(index);
        clip.track_id = target.clone();
        clip.start_time = new_start;
        project.track_mut(target)?.clips.push(clip);
    }

    project.extend_duration();
    Some(MovedClip {
        from_track,
        to_track: target.clone(),
    })
}

/// Trim a clip from both ends
///
/// `start_offset` moves the left edge right (and skips that much source
/// audio); `end_offset` pulls the right edge left. Negative offsets extend
/// the clip. Edits that would leave a non-positive duration or a negative
/// start are rejected.
pub fn trim_clip(
    project: &mut Project,
    clip_id: &ClipId,
    start_offset: f64,
    end_offset: f64,
) -> bool {
    let Some(clip) = project.clip_mut(clip_id) else {
        return false;
    };
    let Some((start, duration)) = trimmed_bounds(clip, start_offset, end_offset) else {
        debug!("trim_clip: rejected degenerate trim of {}", clip_id);
        return false;
    };

    clip.start_time = start;
    clip.duration = duration;
    clip.source_offset += start_offset;
    project.extend_duration();
    true
}

/// New `(start, duration)` after a trim, or `None` if the result would be
/// degenerate
pub fn trimmed_bounds(clip: &Clip, start_offset: f64, end_offset: f64) -> Option<(f64, f64)> {
    if !start_offset.is_finite() || !end_offset.is_finite() {
        return None;
    }
    let start = clip.start_time + start_offset;
    let duration = clip.duration - (start_offset + end_offset);
    (duration > 0.0 && start >= 0.0).then_some((start, duration))
}

/// Split a clip at timeline position `at_time`
///
/// The cut lands at `at_time` rounded to a whole sample of the clip's
/// native rate. The first half keeps the original window onto the samples
/// before the cut; the second half owns the rest and starts exactly where
/// the first ends, so the two durations always add up to the original.
/// A cut inside leading silence (negative `source_offset`) or past the end
/// of the audio leaves one half without samples but still at the right
/// place on the timeline. Both halves get fresh envelopes of
/// `envelope_points` resolution. The original clip is removed only once
/// both halves have been built.
pub fn split_clip(
    project: &mut Project,
    clip_id: &ClipId,
    at_time: f64,
    ids: (ClipId, ClipId),
    envelope_points: usize,
) -> Option<(ClipId, ClipId)> {
    let clip = project.clip(clip_id)?;
    if !(at_time > clip.start_time && at_time < clip.end_time()) {
        debug!(
            "split_clip: {:.3}s is outside {} [{:.3}, {:.3})",
            at_time,
            clip_id,
            clip.start_time,
            clip.end_time()
        );
        return None;
    }

    let sample_rate = clip.audio.sample_rate() as f64;
    if sample_rate <= 0.0 {
        return None;
    }
    let total = clip.audio.num_frames();

    let first_duration = ((at_time - clip.start_time) * sample_rate).round() / sample_rate;
    if first_duration <= 0.0 || first_duration >= clip.duration {
        return None;
    }

    // Only the slice index is clamped; the cut time stays at `at_time`
    let cut_position = clip.source_offset + first_duration;
    let split_index = (cut_position * sample_rate).round().clamp(0.0, total as f64) as usize;
    let second_offset = cut_position - split_index as f64 / sample_rate;

    let (first_id, second_id) = ids;
    let first_audio = Arc::new(clip.audio.slice_frames(0..split_index));
    let second_audio = Arc::new(clip.audio.slice_frames(split_index..total));

    let first = Clip {
        id: first_id.clone(),
        track_id: clip.track_id.clone(),
        waveform: waveform::import_envelope(&first_audio, envelope_points),
        audio: first_audio,
        start_time: clip.start_time,
        duration: first_duration,
        source_offset: clip.source_offset,
        name: format!("{} (1)", clip.name),
    };
    let second = Clip {
        id: second_id.clone(),
        track_id: clip.track_id.clone(),
        waveform: waveform::import_envelope(&second_audio, envelope_points),
        audio: second_audio,
        start_time: clip.start_time + first_duration,
        duration: clip.duration - first_duration,
        source_offset: second_offset,
        name: format!("{} (2)", clip.name),
    };

    let track_id = clip.track_id.clone();
    let track = project.track_mut(&track_id)?;
    let index = track.clips.iter().position(|c| &c.id == clip_id)?;
    track.clips.push(first);
    track.clips.push(second);
    track.clips.remove(index);

    Some((first_id, second_id))
}
