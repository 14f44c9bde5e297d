//! Track effect model
//!
//! Each effect carries a tagged parameter set: the variant decides which
//! parameters exist, and every value is clamped to its range on the way in.
//! Updates are partial patches that must match the stored variant.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::project::EffectId;

// ============================================================================
// Parameter Ranges
// ============================================================================

/// EQ band gain range in dB
pub const EQ_GAIN_RANGE: (f32, f32) = (-12.0, 12.0);

/// Compressor peak-reduction amount range
pub const PEAK_REDUCTION_RANGE: (f32, f32) = (0.0, 100.0);

/// Compressor makeup gain range in dB
pub const MAKEUP_GAIN_RANGE: (f32, f32) = (-20.0, 20.0);

/// Reverb mix and size range (percent)
pub const PERCENT_RANGE: (f32, f32) = (0.0, 100.0);

#[inline]
fn clamp_to(value: f32, range: (f32, f32)) -> f32 {
    if value.is_nan() {
        return range.0.max(0.0).min(range.1);
    }
    value.clamp(range.0, range.1)
}

// ============================================================================
// Effect Kinds and Parameters
// ============================================================================

/// Effect type discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Eq,
    Compressor,
    Reverb,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectKind::Eq => write!(f, "eq"),
            EffectKind::Compressor => write!(f, "compressor"),
            EffectKind::Reverb => write!(f, "reverb"),
        }
    }
}

/// Three-band EQ gains in dB
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqParams {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl EqParams {
    pub fn new(low: f32, mid: f32, high: f32) -> Self {
        Self {
            low: clamp_to(low, EQ_GAIN_RANGE),
            mid: clamp_to(mid, EQ_GAIN_RANGE),
            high: clamp_to(high, EQ_GAIN_RANGE),
        }
    }
}

/// Single-knob compressor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompressorParams {
    /// Compression amount, 0-100
    pub peak_reduction: f32,
    /// Makeup gain in dB, -20 to +20
    pub makeup_gain: f32,
}

impl CompressorParams {
    pub fn new(peak_reduction: f32, makeup_gain: f32) -> Self {
        Self {
            peak_reduction: clamp_to(peak_reduction, PEAK_REDUCTION_RANGE),
            makeup_gain: clamp_to(makeup_gain, MAKEUP_GAIN_RANGE),
        }
    }
}

/// Convolution reverb
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbParams {
    /// Wet/dry mix, 0-100
    pub mix: f32,
    /// Room size, 0-100
    pub size: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            mix: 50.0,
            size: 50.0,
        }
    }
}

impl ReverbParams {
    pub fn new(mix: f32, size: f32) -> Self {
        Self {
            mix: clamp_to(mix, PERCENT_RANGE),
            size: clamp_to(size, PERCENT_RANGE),
        }
    }
}

/// Parameter set, tagged by effect type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectParams {
    Eq(EqParams),
    Compressor(CompressorParams),
    Reverb(ReverbParams),
}

impl EffectParams {
    /// Default parameters for a kind
    pub fn defaults(kind: EffectKind) -> Self {
        match kind {
            EffectKind::Eq => EffectParams::Eq(EqParams::default()),
            EffectKind::Compressor => EffectParams::Compressor(CompressorParams::default()),
            EffectKind::Reverb => EffectParams::Reverb(ReverbParams::default()),
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParams::Eq(_) => EffectKind::Eq,
            EffectParams::Compressor(_) => EffectKind::Compressor,
            EffectParams::Reverb(_) => EffectKind::Reverb,
        }
    }

    /// Re-apply range clamps (used after deserializing untrusted input)
    pub fn clamped(self) -> Self {
        match self {
            EffectParams::Eq(p) => EffectParams::Eq(EqParams::new(p.low, p.mid, p.high)),
            EffectParams::Compressor(p) => {
                EffectParams::Compressor(CompressorParams::new(p.peak_reduction, p.makeup_gain))
            }
            EffectParams::Reverb(p) => EffectParams::Reverb(ReverbParams::new(p.mix, p.size)),
        }
    }
}

// ============================================================================
// Patches
// ============================================================================

/// Partial parameter update for one effect variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamPatch {
    Eq {
        low: Option<f32>,
        mid: Option<f32>,
        high: Option<f32>,
    },
    Compressor {
        peak_reduction: Option<f32>,
        makeup_gain: Option<f32>,
    },
    Reverb {
        mix: Option<f32>,
        size: Option<f32>,
    },
}

/// Update applied through `update_effect_params`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectPatch {
    pub enabled: Option<bool>,
    pub params: Option<ParamPatch>,
}

impl EffectPatch {
    /// Patch that only toggles the enabled flag
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            params: None,
        }
    }

    /// Patch that only changes parameters
    pub fn params(params: ParamPatch) -> Self {
        Self {
            enabled: None,
            params: Some(params),
        }
    }
}

// ============================================================================
// Effect
// ============================================================================

/// One effect instance in a track's chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub id: EffectId,
    pub params: EffectParams,
    pub enabled: bool,
}

impl Effect {
    /// New enabled effect
    pub fn new(id: EffectId, params: EffectParams) -> Self {
        Self {
            id,
            params: params.clamped(),
            enabled: true,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.params.kind()
    }

    /// Apply a patch in place
    ///
    /// Returns false (and leaves the effect untouched) when the parameter
    /// patch targets a different effect type.
    pub fn apply_patch(&mut self, patch: &EffectPatch) -> bool {
        let params = match (patch.params, self.params) {
            (None, current) => current,
            (Some(ParamPatch::Eq { low, mid, high }), EffectParams::Eq(p)) => {
                EffectParams::Eq(EqParams::new(
                    low.unwrap_or(p.low),
                    mid.unwrap_or(p.mid),
                    high.unwrap_or(p.high),
                ))
            }
            (
                Some(ParamPatch::Compressor {
                    peak_reduction,
                    makeup_gain,
                }),
                EffectParams::Compressor(p),
            ) => EffectParams::Compressor(CompressorParams::new(
                peak_reduction.unwrap_or(p.peak_reduction),
                makeup_gain.unwrap_or(p.makeup_gain),
            )),
            (Some(ParamPatch::Reverb { mix, size }), EffectParams::Reverb(p)) => {
                EffectParams::Reverb(ReverbParams::new(
                    mix.unwrap_or(p.mix),
                    size.unwrap_or(p.size),
                ))
            }
            _ => return false,
        };

        self.params = params;
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn effect(params: EffectParams) -> Effect {
        Effect::new(EffectId::from("fx-test"), params)
    }

    #[test_case(EffectKind::Eq, EffectParams::Eq(EqParams { low: 0.0, mid: 0.0, high: 0.0 }) ; "eq")]
    #[test_case(EffectKind::Compressor, EffectParams::Compressor(CompressorParams { peak_reduction: 0.0, makeup_gain: 0.0 }) ; "compressor")]
    #[test_case(EffectKind::Reverb, EffectParams::Reverb(ReverbParams { mix: 50.0, size: 50.0 }) ; "reverb")]
    fn test_defaults(kind: EffectKind, expected: EffectParams) {
        assert_eq!(EffectParams::defaults(kind), expected);
        assert_eq!(expected.kind(), kind);
    }

    #[test]
    fn test_construction_clamps() {
        let fx = effect(EffectParams::Compressor(CompressorParams {
            peak_reduction: 140.0,
            makeup_gain: -35.0,
        }));
        assert_eq!(
            fx.params,
            EffectParams::Compressor(CompressorParams {
                peak_reduction: 100.0,
                makeup_gain: -20.0
            })
        );
    }

    #[test]
    fn test_patch_merges_fields() {
        let mut fx = effect(EffectParams::Eq(EqParams::new(1.0, 2.0, 3.0)));
        assert!(fx.apply_patch(&EffectPatch::params(ParamPatch::Eq {
            low: None,
            mid: Some(-4.0),
            high: Some(40.0),
        })));
        assert_eq!(fx.params, EffectParams::Eq(EqParams::new(1.0, -4.0, 12.0)));
        assert!(fx.enabled);
    }

    #[test]
    fn test_patch_for_wrong_variant_is_rejected() {
        let mut fx = effect(EffectParams::Reverb(ReverbParams::default()));
        let patch = EffectPatch {
            enabled: Some(false),
            params: Some(ParamPatch::Eq {
                low: Some(3.0),
                mid: None,
                high: None,
            }),
        };
        assert!(!fx.apply_patch(&patch));
        assert!(fx.enabled);
        assert_eq!(fx.params, EffectParams::Reverb(ReverbParams::default()));
    }

    #[test]
    fn test_enable_toggle_keeps_params() {
        let mut fx = effect(EffectParams::Reverb(ReverbParams::new(20.0, 80.0)));
        assert!(fx.apply_patch(&EffectPatch::enabled(false)));
        assert!(!fx.enabled);
        assert_eq!(fx.params, EffectParams::Reverb(ReverbParams::new(20.0, 80.0)));
    }

    #[test]
    fn test_params_serde_is_tagged() {
        let json = serde_json::to_value(EffectParams::Reverb(ReverbParams::new(10.0, 20.0))).unwrap();
        assert_eq!(json["type"], "reverb");
        assert_eq!(json["mix"], 10.0);
    }
}
