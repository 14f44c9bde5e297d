//! State Management Module
//!
//! Provides the project model, the effect parameter model, clip editing
//! and the command-driven store that owns the canonical project.

pub mod editor;
pub mod effect;
pub mod project;
pub mod store;

pub use effect::{
    CompressorParams, Effect, EffectKind, EffectParams, EffectPatch, EqParams, ParamPatch,
    ReverbParams,
};
pub use project::{Clip, ClipId, EffectId, Project, Track, TrackId};
pub use store::{Applied, Change, Command, ProjectStore, Selection};
