//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command on top of the
//! `Workstation` facade and the in-process backend.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::engine::{io, waveform};
use crate::state::{
    ClipId, CompressorParams, EffectKind, EffectPatch, EqParams, ParamPatch, ReverbParams, TrackId,
};
use crate::workstation::Workstation;

/// Shortest project a fitted mix can have
const MIN_FIT_DURATION: f64 = 0.001;

/// Effects applied to every track of a mix
#[derive(Debug, Clone, Copy, Default)]
pub struct MixEffects {
    pub eq: Option<EqParams>,
    pub compressor: Option<CompressorParams>,
    pub reverb: Option<ReverbParams>,
}

/// Resolve the engine configuration from `--config` and `--sample-rate`
pub fn load_config(path: Option<&Path>, sample_rate: Option<u32>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(rate) = sample_rate {
        config = config.with_sample_rate(rate);
    }
    config.validate()?;
    Ok(config)
}

/// Expand inputs: files stay as given, directories yield their WAV files
/// in path order
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    path.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
                })
                .collect();
            found.sort();
            debug!("{}: {} WAV files", input.display(), found.len());
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        bail!("no WAV inputs found");
    }
    Ok(files)
}

/// Hex SHA-256 of a byte string
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Mix every input onto its own track and export the result.
///
/// Returns the SHA-256 of the written file.
pub fn mix(
    config: EngineConfig,
    inputs: &[PathBuf],
    at: &[f64],
    effects: MixEffects,
    duration: Option<f64>,
    out: &Path,
) -> Result<String> {
    let files = collect_inputs(inputs)?;
    let config = EngineConfig {
        default_project_duration: duration.unwrap_or(MIN_FIT_DURATION),
        ..config
    };
    let mut ws = Workstation::new(config)?;

    for (index, file) in files.iter().enumerate() {
        let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        let track = ws.add_track()?;
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("Track {}", index + 1));
        ws.update_track_name(&track, name.clone())?;

        let start = at.get(index).copied().unwrap_or(0.0);
        ws.import_audio(&track, &bytes, start, name)
            .with_context(|| format!("importing {}", file.display()))?;
        apply_effects(&mut ws, &track, effects)?;
        info!("Added {} at {:.3}s", file.display(), start);
    }

    ws.export_to_path(out)
        .with_context(|| format!("exporting to {}", out.display()))?;
    let written = fs::read(out)?;
    let digest = sha256_hex(&written);

    let project = ws.project();
    println!("Mixed {} tracks ({:.3}s) into {}", project.tracks.len(), project.duration, out.display());
    println!("sha256 {}", digest);
    Ok(digest)
}

fn apply_effects(ws: &mut Workstation, track: &TrackId, effects: MixEffects) -> Result<()> {
    if let Some(eq) = effects.eq {
        if let Some(id) = ws.add_effect(track, EffectKind::Eq)? {
            ws.update_effect_params(
                track,
                &id,
                EffectPatch::params(ParamPatch::Eq {
                    low: Some(eq.low),
                    mid: Some(eq.mid),
                    high: Some(eq.high),
                }),
            )?;
        }
    }
    if let Some(comp) = effects.compressor {
        if let Some(id) = ws.add_effect(track, EffectKind::Compressor)? {
            ws.update_effect_params(
                track,
                &id,
                EffectPatch::params(ParamPatch::Compressor {
                    peak_reduction: Some(comp.peak_reduction),
                    makeup_gain: Some(comp.makeup_gain),
                }),
            )?;
        }
    }
    if let Some(reverb) = effects.reverb {
        if let Some(id) = ws.add_effect(track, EffectKind::Reverb)? {
            ws.update_effect_params(
                track,
                &id,
                EffectPatch::params(ParamPatch::Reverb {
                    mix: Some(reverb.mix),
                    size: Some(reverb.size),
                }),
            )?;
        }
    }
    Ok(())
}

/// Print a summary of a WAV file.
pub fn info(path: &Path, points: usize) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let audio = io::decode_wav(&bytes)?;

    println!("File:        {}", path.display());
    println!("Duration:    {:.3}s", audio.duration_secs());
    println!("Channels:    {}", audio.num_channels());
    println!("Sample rate: {} Hz", audio.sample_rate());
    println!("Peak:        {:.4}", audio.peak());
    println!("sha256       {}", sha256_hex(&bytes));

    let envelope = waveform::import_envelope(&audio, points);
    let scale = envelope.iter().copied().fold(0.0_f32, f32::max).max(f32::EPSILON);
    println!("Envelope:");
    for (i, value) in envelope.iter().enumerate() {
        let bar = "#".repeat(((value / scale) * 40.0).round() as usize);
        println!("  {:>3} {:.4} {}", i, value, bar);
    }
    Ok(())
}

/// Split a WAV file in two and write each half next to the other.
///
/// Returns the paths written.
pub fn split(config: EngineConfig, path: &Path, at: f64, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut ws = Workstation::new(config)?;
    let track = ws.add_track()?;
    let Some(clip) = ws.import_audio(&track, &bytes, 0.0, "input")? else {
        bail!("could not place {}", path.display());
    };
    let Some((first, second)) = ws.split_clip(&clip, at)? else {
        bail!("{:.3}s is not inside {}", at, path.display());
    };

    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "split".to_string());

    let project = ws.snapshot();
    let write_half = |n: usize, id: &ClipId| -> Result<PathBuf> {
        let Some(half) = project.clip(id) else {
            bail!("split half {} missing", n);
        };
        let out = out_dir.join(format!("{}-{}.wav", stem, n));
        fs::write(&out, io::encode_pcm16(&half.audio)?)
            .with_context(|| format!("writing {}", out.display()))?;
        println!("{} {:.3}s -> {}", half.name, half.duration, out.display());
        Ok(out)
    };

    Ok((write_half(1, &first)?, write_half(2, &second)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_tone(dir: &Path, name: &str, seconds: f32) -> PathBuf {
        let path = dir.join(name);
        let bytes = io::encode_pcm16(&io::generate_test_tone(440.0, seconds, 8000)).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_sample_rate(8000)
    }

    #[test]
    fn test_collect_inputs_walks_directories() {
        let dir = tempdir().unwrap();
        write_tone(dir.path(), "b.wav", 0.1);
        write_tone(dir.path(), "a.WAV", 0.1);
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.WAV", "b.wav"]);

        let empty = tempdir().unwrap();
        assert!(collect_inputs(&[empty.path().to_path_buf()]).is_err());
    }

    #[test]
    fn test_mix_fits_duration_and_reports_digest() {
        let dir = tempdir().unwrap();
        let a = write_tone(dir.path(), "a.wav", 0.5);
        let b = write_tone(dir.path(), "b.wav", 0.25);
        let out = dir.path().join("mix.wav");

        let effects = MixEffects {
            eq: Some(EqParams::new(2.0, 0.0, -2.0)),
            ..Default::default()
        };
        let digest = mix(config(), &[a, b], &[0.0, 1.0], effects, None, &out).unwrap();

        let written = fs::read(&out).unwrap();
        assert_eq!(digest, sha256_hex(&written));
        let decoded = io::decode_wav(&written).unwrap();
        assert_eq!(decoded.num_channels(), 2);
        assert_eq!(decoded.num_frames(), 10000);
    }

    #[test]
    fn test_split_writes_two_halves() {
        let dir = tempdir().unwrap();
        let input = write_tone(dir.path(), "tone.wav", 1.0);
        let out_dir = dir.path().join("halves");

        let (first, second) = split(config(), &input, 0.25, &out_dir).unwrap();
        let first = io::decode_wav(&fs::read(first).unwrap()).unwrap();
        let second = io::decode_wav(&fs::read(second).unwrap()).unwrap();
        assert_eq!(first.num_frames(), 2000);
        assert_eq!(first.num_frames() + second.num_frames(), 8000);

        assert!(split(config(), &input, 3.0, &out_dir).is_err());
    }
}
