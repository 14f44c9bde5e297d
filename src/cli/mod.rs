//! CLI Module
//!
//! Command-line front end for offline use of the engine: mix WAV files
//! into one export, inspect a WAV, or split one at a timestamp.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::state::{CompressorParams, EqParams, ReverbParams};

/// Mixdeck - multi-track timeline and mixdown engine
#[derive(Parser, Debug)]
#[command(name = "mixdeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the engine sample rate
    #[arg(long, global = true)]
    pub sample_rate: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mix WAV files, one track each, into a single export
    #[command(name = "mix")]
    Mix {
        /// Input WAV file or directory of WAV files (one track per file)
        #[arg(short, long = "track", required = true)]
        tracks: Vec<PathBuf>,

        /// Start time in seconds of each track's clip, in input order
        #[arg(long = "at")]
        at: Vec<f64>,

        /// Three-band EQ on every track: low,mid,high in dB
        #[arg(long, value_parser = parse_eq)]
        eq: Option<EqParams>,

        /// Compressor on every track: peak_reduction,makeup_db
        #[arg(long, value_parser = parse_compressor)]
        compress: Option<CompressorParams>,

        /// Reverb on every track: mix,size in percent
        #[arg(long, value_parser = parse_reverb)]
        reverb: Option<ReverbParams>,

        /// Project length in seconds (defaults to the end of the last clip)
        #[arg(long)]
        duration: Option<f64>,

        /// Output WAV path
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print duration, format and a coarse envelope of a WAV file
    #[command(name = "info")]
    Info {
        /// WAV file to inspect
        path: PathBuf,

        /// Envelope resolution
        #[arg(long, default_value_t = 16)]
        points: usize,
    },

    /// Split a WAV file at a timestamp into two files
    #[command(name = "split")]
    Split {
        /// WAV file to split
        path: PathBuf,

        /// Split position in seconds
        #[arg(long)]
        at: f64,

        /// Directory for the two halves
        #[arg(long)]
        out_dir: PathBuf,
    },
}

fn parse_floats<const N: usize>(s: &str) -> Result<[f32; N], String> {
    let values: Vec<f32> = s
        .split(',')
        .map(|part| part.trim().parse::<f32>().map_err(|e| format!("'{}': {}", part, e)))
        .collect::<Result<_, _>>()?;
    values
        .try_into()
        .map_err(|v: Vec<f32>| format!("expected {} comma-separated values, got {}", N, v.len()))
}

fn parse_eq(s: &str) -> Result<EqParams, String> {
    let [low, mid, high] = parse_floats::<3>(s)?;
    Ok(EqParams::new(low, mid, high))
}

fn parse_compressor(s: &str) -> Result<CompressorParams, String> {
    let [peak_reduction, makeup] = parse_floats::<2>(s)?;
    Ok(CompressorParams::new(peak_reduction, makeup))
}

fn parse_reverb(s: &str) -> Result<ReverbParams, String> {
    let [mix, size] = parse_floats::<2>(s)?;
    Ok(ReverbParams::new(mix, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_effect_args() {
        assert_eq!(parse_eq("3,-2.5,20").unwrap(), EqParams::new(3.0, -2.5, 12.0));
        assert_eq!(parse_compressor("40, 6").unwrap(), CompressorParams::new(40.0, 6.0));
        assert!(parse_reverb("10").is_err());
        assert!(parse_eq("a,b,c").is_err());
    }

    #[test]
    fn test_mix_arguments() {
        let cli = Cli::try_parse_from([
            "mixdeck", "mix", "--track", "a.wav", "--track", "b.wav", "--at", "0", "--at", "1.5",
            "--reverb", "30,60", "--out", "mix.wav",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Mix { tracks, at, reverb, .. }) => {
                assert_eq!(tracks.len(), 2);
                assert_eq!(at, vec![0.0, 1.5]);
                assert_eq!(reverb, Some(ReverbParams::new(30.0, 60.0)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
