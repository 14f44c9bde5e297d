//! Offline mixdown
//!
//! Export rebuilds the live signal path for every non-muted track on an
//! offline context, renders exactly `round(sample_rate * duration)` frames
//! and encodes them as 16-bit stereo PCM WAV.
//!
//! Differences from live playback:
//! - Solo is not consulted; only mute removes a track
//! - Clips get no click-avoidance fades
//! - Each track's volume is a single gain stage shared by its clips

use std::path::Path;

use log::{debug, info};

use crate::backend::{AudioBackend, BackendError, Destination, SourceSchedule, StageGraph, StageSpec};
use crate::config::EngineConfig;
use crate::dsp::EffectChainBuilder;
use crate::engine::buffer::SampleBuffer;
use crate::engine::io;
use crate::error::{MixdeckError, Result};
use crate::state::project::{Clip, Project, Track};

/// Renders projects to encoded audio
#[derive(Debug, Clone, Copy)]
pub struct ExportRenderer {
    chain: EffectChainBuilder,
}

impl ExportRenderer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            chain: EffectChainBuilder::new(config.sample_rate, config.reverb_seed),
        }
    }

    /// Frames an export of `project` holds at `sample_rate`
    pub fn frame_count(project: &Project, sample_rate: u32) -> usize {
        (sample_rate as f64 * project.duration).round().max(0.0) as usize
    }

    /// Render the mix synchronously
    ///
    /// # Errors
    /// * `Export` - if the project is empty in time or the render fails
    pub fn render(&self, project: &Project, backend: &dyn AudioBackend) -> Result<SampleBuffer> {
        let frames = Self::frame_count(project, backend.sample_rate());
        if frames == 0 {
            return Err(MixdeckError::export("project has zero duration"));
        }

        let mut ctx = backend.offline_context(frames);
        for track in project.tracks.iter().filter(|t| !t.muted) {
            self.schedule_track(ctx.as_mut(), track).map_err(render_failed)?;
        }

        let mix = ctx.render().map_err(render_failed)?;
        debug!("[EXPORT] Rendered {} frames", mix.num_frames());
        Ok(mix)
    }

    fn schedule_track<G>(&self, ctx: &mut G, track: &Track) -> std::result::Result<(), BackendError>
    where
        G: StageGraph + ?Sized,
    {
        if track.clips.is_empty() {
            return Ok(());
        }
        let volume = ctx.create_stage(StageSpec::Gain { gain: track.volume })?;
        ctx.connect(volume, Destination::Output)?;

        for clip in &track.clips {
            let Some(schedule) = absolute_schedule(clip) else {
                continue;
            };
            let source = ctx.create_stage(StageSpec::Source {
                buffer: clip.audio.clone(),
            })?;
            let chain = self.chain.build(&mut *ctx, &track.effects)?;
            match (chain.head(), chain.tail()) {
                (Some(head), Some(tail)) => {
                    ctx.connect(source, Destination::Stage(head))?;
                    ctx.connect(tail, Destination::Stage(volume))?;
                }
                _ => ctx.connect(source, Destination::Stage(volume))?,
            }
            ctx.start_source(source, schedule)?;
        }
        Ok(())
    }

    /// Encode a rendered mix as 16-bit PCM WAV
    pub fn encode_wav(buffer: &SampleBuffer) -> Result<Vec<u8>> {
        io::encode_pcm16(buffer)
    }

    /// Render and encode
    pub fn export(&self, project: &Project, backend: &dyn AudioBackend) -> Result<Vec<u8>> {
        let mix = self.render(project, backend)?;
        let bytes = Self::encode_wav(&mix)?;
        info!(
            "[EXPORT] '{}': {:.3}s, {} bytes",
            project.name,
            project.duration,
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Write exported bytes to disk
pub fn export_to_path(bytes: &[u8], path: &Path) -> Result<()> {
    std::fs::write(path, bytes)?;
    info!("[EXPORT] Wrote {}", path.display());
    Ok(())
}

/// Schedule a clip at its absolute timeline position
fn absolute_schedule(clip: &Clip) -> Option<SourceSchedule> {
    let mut when = clip.start_time;
    let mut offset = clip.source_offset;
    let mut duration = clip.duration;
    if offset < 0.0 {
        when -= offset;
        duration += offset;
        offset = 0.0;
    }
    (duration > 0.0).then_some(SourceSchedule {
        when,
        offset,
        duration: Some(duration),
    })
}

fn render_failed(e: BackendError) -> MixdeckError {
    MixdeckError::export(format!("offline render failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::state::project::{ClipId, TrackId};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    const SR: u32 = 8000;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: SR,
            render_quantum: 128,
            ..EngineConfig::default()
        }
    }

    fn track_with_clip(id: &str, level: f32, start: f64) -> Track {
        let track_id = TrackId::from(id);
        let mut track = Track::new(track_id.clone(), id);
        track.clips.push(Clip {
            id: ClipId::from(format!("{}-clip", id)),
            track_id,
            audio: Arc::new(SampleBuffer::from_mono(vec![level; SR as usize], SR)),
            start_time: start,
            duration: 1.0,
            source_offset: 0.0,
            waveform: Vec::new(),
            name: "c".to_string(),
        });
        track
    }

    #[test]
    fn test_zero_duration_is_an_error() {
        let backend = SoftwareBackend::new(SR, 128);
        let project = Project::new("empty", 0.0);
        let err = ExportRenderer::new(&config()).render(&project, &backend).unwrap_err();
        assert_eq!(err.error_code(), "EXPORT_ERROR");
    }

    #[test]
    fn test_mix_places_clips_and_skips_muted() {
        let backend = SoftwareBackend::new(SR, 128);
        let mut project = Project::new("mix", 2.0);
        let mut a = track_with_clip("a", 0.5, 0.5);
        a.volume = 0.5;
        let mut b = track_with_clip("b", 0.9, 0.0);
        b.muted = true;
        let mut c = track_with_clip("c", 0.1, 0.0);
        c.soloed = true;
        project.tracks = vec![a, b, c];

        let mix = ExportRenderer::new(&config()).render(&project, &backend).unwrap();
        assert_eq!(mix.num_frames(), 16000);
        assert_eq!(mix.num_channels(), 2);
        // Solo is ignored: track a still sounds from 0.5 s at half volume
        assert_abs_diff_eq!(mix.channel(0)[2000], 0.1, epsilon = 1e-5);
        assert_abs_diff_eq!(mix.channel(0)[6000], 0.35, epsilon = 1e-5);
        assert_abs_diff_eq!(mix.channel(1)[10000], 0.25, epsilon = 1e-5);
        assert_eq!(mix.channel(0)[14000], 0.0);
    }

    #[test]
    fn test_export_is_deterministic_and_sized() {
        let backend = SoftwareBackend::new(SR, 128);
        let mut project = Project::new("det", 1.5);
        project.tracks.push(track_with_clip("a", 0.3, 0.0));
        let renderer = ExportRenderer::new(&config());

        let first = renderer.export(&project, &backend).unwrap();
        let second = renderer.export(&project, &backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), io::WAV_HEADER_LEN + 12000 * 2 * 2);
    }

    #[test]
    fn test_export_to_path_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        export_to_path(b"RIFF", &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
    }
}
