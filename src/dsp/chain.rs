//! Effect chain construction
//!
//! Turns a track's effect list into backend stages wired in series.
//! Effects are processed in list order (index 0 first). Disabled effects
//! get no stage at all, so a re-enabled effect lands back in its list
//! position on the next build.

use std::sync::Arc;

use super::{generate_impulse, CompressorSettings, EqSettings, ReverbSettings};
use crate::backend::{BackendResult, Destination, StageGraph, StageId, StageSpec};
use crate::engine::buffer::db_to_linear;
use crate::state::{CompressorParams, Effect, EffectId, EffectParams, EqParams, ReverbParams};

/// Fixed compressor knee in dB
const COMPRESSOR_KNEE_DB: f32 = 10.0;

// ============================================================================
// Parameter Mapping
// ============================================================================

/// EQ band gains pass through unchanged
pub fn eq_settings(params: &EqParams) -> EqSettings {
    EqSettings {
        low_gain_db: params.low,
        mid_gain_db: params.mid,
        high_gain_db: params.high,
    }
}

/// Map the single peak-reduction knob onto full compressor settings
///
/// More reduction lowers the threshold, raises the ratio, speeds up the
/// attack and slows the release.
pub fn compressor_settings(params: &CompressorParams) -> CompressorSettings {
    let amount = params.peak_reduction / 100.0;
    CompressorSettings {
        threshold_db: -20.0 - 0.4 * params.peak_reduction,
        ratio: 3.0 + amount * 17.0,
        knee_db: COMPRESSOR_KNEE_DB,
        attack_secs: 0.01 + (1.0 - amount) * 0.04,
        release_secs: 0.1 + amount * 0.4,
        makeup_gain: db_to_linear(params.makeup_gain),
    }
}

/// Synthesize the impulse and split the mix into dry/wet gains
pub fn reverb_settings(params: &ReverbParams, sample_rate: u32, seed: u64) -> ReverbSettings {
    let mix = params.mix / 100.0;
    ReverbSettings {
        impulse: Arc::new(generate_impulse(sample_rate, params.size / 100.0, seed)),
        dry: 1.0 - mix,
        wet: mix,
    }
}

/// Stable 64-bit FNV-1a hash of an effect id
///
/// Mixed into the reverb seed so each reverb instance gets its own noise
/// while staying identical across runs.
fn effect_seed(id: &EffectId) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    id.as_str()
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

// ============================================================================
// Chain Builder
// ============================================================================

/// Stages created for one track chain, in signal order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltChain {
    pub stages: Vec<StageId>,
}

impl BuiltChain {
    /// First stage; the chain's input
    pub fn head(&self) -> Option<StageId> {
        self.stages.first().copied()
    }

    /// Last stage; connect this onward
    pub fn tail(&self) -> Option<StageId> {
        self.stages.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builds per-track effect chains against any `StageGraph`
#[derive(Debug, Clone, Copy)]
pub struct EffectChainBuilder {
    sample_rate: u32,
    reverb_seed: u64,
}

impl EffectChainBuilder {
    pub fn new(sample_rate: u32, reverb_seed: u64) -> Self {
        Self {
            sample_rate,
            reverb_seed,
        }
    }

    /// Stage configuration for one effect
    pub fn stage_spec(&self, effect: &Effect) -> StageSpec {
        match &effect.params {
            EffectParams::Eq(p) => StageSpec::ThreeBandEq(eq_settings(p)),
            EffectParams::Compressor(p) => StageSpec::Compressor(compressor_settings(p)),
            EffectParams::Reverb(p) => StageSpec::Reverb(reverb_settings(
                p,
                self.sample_rate,
                self.reverb_seed ^ effect_seed(&effect.id),
            )),
        }
    }

    /// Stage configurations for the enabled effects, in list order
    pub fn specs(&self, effects: &[Effect]) -> Vec<StageSpec> {
        effects
            .iter()
            .filter(|e| e.enabled)
            .map(|e| self.stage_spec(e))
            .collect()
    }

    /// Create and serially connect the stages for `effects`
    ///
    /// The tail is left unconnected. An empty list yields an empty chain.
    pub fn build<G>(&self, graph: &mut G, effects: &[Effect]) -> BackendResult<BuiltChain>
    where
        G: StageGraph + ?Sized,
    {
        let mut chain = BuiltChain::default();
        for spec in self.specs(effects) {
            let stage = graph.create_stage(spec)?;
            if let Some(previous) = chain.tail() {
                graph.connect(previous, Destination::Stage(stage))?;
            }
            chain.stages.push(stage);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::state::EffectPatch;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn effect(id: &str, params: EffectParams) -> Effect {
        Effect::new(EffectId::from(id), params)
    }

    fn kinds(specs: &[StageSpec]) -> Vec<&'static str> {
        specs.iter().map(StageSpec::kind_name).collect()
    }

    #[test]
    fn test_compressor_mapping_extremes() {
        let none = compressor_settings(&CompressorParams::new(0.0, 0.0));
        assert_abs_diff_eq!(none.threshold_db, -20.0);
        assert_abs_diff_eq!(none.ratio, 3.0);
        assert_abs_diff_eq!(none.attack_secs, 0.05);
        assert_abs_diff_eq!(none.release_secs, 0.1);
        assert_abs_diff_eq!(none.makeup_gain, 1.0);

        let full = compressor_settings(&CompressorParams::new(100.0, 6.0));
        assert_abs_diff_eq!(full.threshold_db, -60.0);
        assert_abs_diff_eq!(full.ratio, 20.0);
        assert_abs_diff_eq!(full.knee_db, 10.0);
        assert_abs_diff_eq!(full.attack_secs, 0.01);
        assert_abs_diff_eq!(full.release_secs, 0.5);
        assert_abs_diff_eq!(full.makeup_gain, 1.9953, epsilon = 1e-3);
    }

    #[test]
    fn test_reverb_mix_split() {
        let settings = reverb_settings(&ReverbParams::new(25.0, 0.0), 8000, 1);
        assert_abs_diff_eq!(settings.dry, 0.75);
        assert_abs_diff_eq!(settings.wet, 0.25);
        assert_eq!(settings.impulse.num_frames(), 4000);
    }

    #[test]
    fn test_eq_gains_pass_through() {
        let settings = eq_settings(&EqParams::new(3.0, -4.5, 12.0));
        assert_eq!(
            settings,
            EqSettings { low_gain_db: 3.0, mid_gain_db: -4.5, high_gain_db: 12.0 }
        );
    }

    #[test]
    fn test_disabled_effects_are_skipped_and_order_restored() {
        let builder = EffectChainBuilder::new(8000, 0);
        let mut effects = vec![
            effect("fx-eq", EffectParams::defaults(crate::state::EffectKind::Eq)),
            effect("fx-verb", EffectParams::defaults(crate::state::EffectKind::Reverb)),
        ];

        effects[0].apply_patch(&EffectPatch::enabled(false));
        assert_eq!(kinds(&builder.specs(&effects)), vec!["reverb"]);

        effects[0].apply_patch(&EffectPatch::enabled(true));
        assert_eq!(kinds(&builder.specs(&effects)), vec!["eq", "reverb"]);
    }

    #[test]
    fn test_reverb_seed_depends_on_effect_id() {
        let builder = EffectChainBuilder::new(8000, 7);
        let params = EffectParams::Reverb(ReverbParams::new(50.0, 0.0));
        let impulse = |id: &str| match builder.stage_spec(&effect(id, params)) {
            StageSpec::Reverb(settings) => settings.impulse,
            other => panic!("unexpected stage {}", other.kind_name()),
        };
        assert_eq!(impulse("fx-a"), impulse("fx-a"));
        assert_ne!(impulse("fx-a"), impulse("fx-b"));
    }

    #[test]
    fn test_build_wires_stages_in_series() {
        let mut backend = SoftwareBackend::new(8000, 64);
        let builder = EffectChainBuilder::new(8000, 0);
        let effects = vec![
            effect("fx-1", EffectParams::Compressor(CompressorParams::new(50.0, 0.0))),
            effect("fx-2", EffectParams::Eq(EqParams::default())),
        ];

        let chain = builder.build(&mut backend, &effects).unwrap();
        assert_eq!(chain.stages.len(), 2);
        let head = chain.head().unwrap();
        assert_eq!(backend.route_of(head), vec!["compressor", "eq"]);

        let empty = builder.build(&mut backend, &[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.tail(), None);
    }
}
