//! Project data model
//!
//! A `Project` exclusively owns its tracks; a track exclusively owns its
//! clips and effects. Clips point at shared, immutable `SampleBuffer`s.
//! The only code that mutates these types lives in `store` and `editor`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::effect::Effect;
use crate::engine::buffer::SampleBuffer;

/// Lowest zoom factor
pub const MIN_ZOOM: f64 = 0.1;

/// Highest zoom factor
pub const MAX_ZOOM: f64 = 10.0;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh unique id
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Track identifier
    TrackId,
    "track"
);
string_id!(
    /// Clip identifier
    ClipId,
    "clip"
);
string_id!(
    /// Effect identifier
    EffectId,
    "fx"
);

// ============================================================================
// Clip
// ============================================================================

/// A time-bounded window onto decoded audio, placed on a track
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub id: ClipId,
    /// Owning track
    pub track_id: TrackId,
    /// Decoded sample data, shared and never mutated
    pub audio: Arc<SampleBuffer>,
    /// Timeline position in seconds (>= 0)
    pub start_time: f64,
    /// Length on the timeline in seconds (> 0)
    pub duration: f64,
    /// Seconds into `audio` where the clip begins; negative values read as
    /// leading silence
    pub source_offset: f64,
    /// Amplitude envelope computed at import time
    pub waveform: Vec<f32>,
    pub name: String,
}

impl Clip {
    /// Timeline position where the clip stops sounding
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// True if `time` falls inside [start, end)
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time < self.end_time()
    }
}

// ============================================================================
// Track
// ============================================================================

/// One lane of the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub clips: Vec<Clip>,
    /// Linear volume in [0, 1]
    pub volume: f32,
    pub muted: bool,
    pub soloed: bool,
    pub color: Option<String>,
    /// Ordered effect chain; order is significant
    pub effects: Vec<Effect>,
}

impl Track {
    /// Empty track at unity volume
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            clips: Vec::new(),
            volume: 1.0,
            muted: false,
            soloed: false,
            color: None,
            effects: Vec::new(),
        }
    }

    pub fn clip(&self, clip_id: &ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| &c.id == clip_id)
    }

    pub fn effect(&self, effect_id: &EffectId) -> Option<&Effect> {
        self.effects.iter().find(|e| &e.id == effect_id)
    }
}

// ============================================================================
// Project
// ============================================================================

/// The whole timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub name: String,
    pub tracks: Vec<Track>,
    /// Seconds; never shrinks automatically and always covers every clip
    pub duration: f64,
    /// Playhead position in seconds, within [0, duration]
    pub current_time: f64,
    pub is_playing: bool,
    /// Timeline zoom in [MIN_ZOOM, MAX_ZOOM]
    pub zoom: f64,
}

impl Project {
    /// Fresh project with no tracks
    pub fn new(name: impl Into<String>, duration: f64) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
            duration,
            current_time: 0.0,
            is_playing: false,
            zoom: 1.0,
        }
    }

    pub fn track(&self, track_id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| &t.id == track_id)
    }

    pub(crate) fn track_mut(&mut self, track_id: &TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| &t.id == track_id)
    }

    /// Find a clip anywhere in the project
    pub fn clip(&self, clip_id: &ClipId) -> Option<&Clip> {
        self.tracks.iter().find_map(|t| t.clip(clip_id))
    }

    pub(crate) fn clip_mut(&mut self, clip_id: &ClipId) -> Option<&mut Clip> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.clips.iter_mut())
            .find(|c| &c.id == clip_id)
    }

    /// Every clip, in track order
    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.tracks.iter().flat_map(|t| t.clips.iter())
    }

    /// True if at least one track is soloed
    pub fn any_soloed(&self) -> bool {
        self.tracks.iter().any(|t| t.soloed)
    }

    /// Latest clip end, or 0 for an empty timeline
    pub fn content_end(&self) -> f64 {
        self.clips().map(Clip::end_time).fold(0.0, f64::max)
    }

    /// Grow `duration` to cover every clip; never shrinks it
    pub(crate) fn extend_duration(&mut self) {
        let end = self.content_end();
        if end > self.duration {
            self.duration = end;
        }
    }
}
