//! In-process audio backend
//!
//! `SoftwareBackend` renders the stage graph on the calling thread. Its
//! clock only moves when the host renders, and like browser audio contexts
//! it moves in whole render quanta: `render(n)` processes
//! `ceil(n / quantum)` quanta. Teardown acknowledgments are delivered after
//! the next rendered quantum, which is when a realtime thread would first
//! observe the releases.
//!
//! The same graph code backs `SoftwareOfflineContext`, which renders a
//! fixed frame count as fast as possible.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace};

use super::{
    AudioBackend, BackendError, BackendEvent, BackendResult, Destination, OfflineContext,
    SourceSchedule, StageGraph, StageId, StageSpec, TeardownToken,
};
use crate::dsp::{BlockClock, Compressor, ConvolutionReverb, GainStage, Processor, ThreeBandEq};
use crate::engine::buffer::SampleBuffer;
use crate::engine::io;

/// Output channel count of every context
const OUTPUT_CHANNELS: usize = 2;

// ============================================================================
// Stage Graph
// ============================================================================

#[derive(Debug)]
struct SourceNode {
    buffer: Arc<SampleBuffer>,
    schedule: Option<SourceSchedule>,
    ended: bool,
}

impl SourceNode {
    /// Context time at which the scheduled span stops
    fn end_time(&self, schedule: &SourceSchedule) -> f64 {
        let available = (self.buffer.duration_secs() - schedule.offset).max(0.0);
        let span = schedule.duration.map_or(available, |d| d.min(available));
        schedule.when + span.max(0.0)
    }

    fn render(&self, block: &mut [Vec<f32>], clock: BlockClock) {
        let Some(schedule) = self.schedule else {
            return;
        };
        if self.ended {
            return;
        }
        let end = self.end_time(&schedule);
        let rate = self.buffer.sample_rate() as f64;

        let frames = block.first().map_or(0, Vec::len);
        for frame in 0..frames {
            let t = clock.time_at(frame);
            if t < schedule.when || t >= end {
                continue;
            }
            // Linear interpolation doubles as the resampler
            let position = (schedule.offset + (t - schedule.when)) * rate;
            let index = position.floor() as usize;
            let frac = (position - index as f64) as f32;
            for (ch, out) in block.iter_mut().enumerate() {
                let a = self.buffer.sample(ch, index);
                let b = self.buffer.sample(ch, index + 1);
                out[frame] = a + (b - a) * frac;
            }
        }
    }
}

enum Node {
    Source(SourceNode),
    Gain(GainStage),
    Effect(Box<dyn Processor>),
}

struct Stage {
    kind: &'static str,
    node: Node,
    destination: Option<Destination>,
}

/// Stages, wiring and block rendering shared by live and offline contexts
struct Graph {
    sample_rate: u32,
    quantum: usize,
    next_id: u64,
    stages: BTreeMap<StageId, Stage>,
}

impl Graph {
    fn new(sample_rate: u32, quantum: usize) -> Self {
        Self {
            sample_rate,
            quantum: quantum.max(1),
            next_id: 1,
            stages: BTreeMap::new(),
        }
    }

    fn create(&mut self, spec: StageSpec) -> StageId {
        let kind = spec.kind_name();
        let sr = self.sample_rate as f64;
        let node = match spec {
            StageSpec::Source { buffer } => Node::Source(SourceNode {
                buffer,
                schedule: None,
                ended: false,
            }),
            StageSpec::Gain { gain } => Node::Gain(GainStage::new(gain)),
            StageSpec::Fade(envelope) => Node::Effect(Box::new(envelope)),
            StageSpec::ThreeBandEq(settings) => Node::Effect(Box::new(ThreeBandEq::new(settings, sr))),
            StageSpec::Compressor(settings) => Node::Effect(Box::new(Compressor::new(settings, sr))),
            StageSpec::Reverb(settings) => {
                Node::Effect(Box::new(ConvolutionReverb::new(&settings, self.quantum)))
            }
        };

        let id = StageId(self.next_id);
        self.next_id += 1;
        self.stages.insert(
            id,
            Stage {
                kind,
                node,
                destination: None,
            },
        );
        id
    }

    fn stage_mut(&mut self, id: StageId) -> BackendResult<&mut Stage> {
        self.stages
            .get_mut(&id)
            .ok_or_else(|| BackendError::new(format!("unknown {}", id)))
    }

    fn connect(&mut self, from: StageId, to: Destination) -> BackendResult {
        if !self.stages.contains_key(&from) {
            return Err(BackendError::new(format!("unknown {}", from)));
        }
        if let Destination::Stage(target) = to {
            if !self.stages.contains_key(&target) {
                return Err(BackendError::new(format!("unknown {}", target)));
            }
            // Walk downstream from the target; reaching `from` means a cycle
            let mut cursor = Some(target);
            while let Some(id) = cursor {
                if id == from {
                    return Err(BackendError::new(format!(
                        "connecting {} to {} would form a cycle",
                        from, target
                    )));
                }
                cursor = match self.stages.get(&id).and_then(|s| s.destination) {
                    Some(Destination::Stage(next)) => Some(next),
                    _ => None,
                };
            }
        }
        self.stage_mut(from)?.destination = Some(to);
        Ok(())
    }

    fn start_source(&mut self, id: StageId, schedule: SourceSchedule) -> BackendResult {
        let stage = self.stage_mut(id)?;
        match &mut stage.node {
            Node::Source(source) if source.schedule.is_none() => {
                source.schedule = Some(SourceSchedule {
                    offset: schedule.offset.max(0.0),
                    ..schedule
                });
                Ok(())
            }
            Node::Source(_) => Err(BackendError::new(format!("{} already started", id))),
            _ => Err(BackendError::new(format!("{} is not a source", id))),
        }
    }

    fn set_gain(&mut self, id: StageId, gain: f32) -> BackendResult {
        match &mut self.stage_mut(id)?.node {
            Node::Gain(stage) => {
                stage.set_gain(gain);
                Ok(())
            }
            _ => Err(BackendError::new(format!("{} is not a gain stage", id))),
        }
    }

    fn release(&mut self, id: StageId) -> BackendResult {
        if self.stages.remove(&id).is_none() {
            return Err(BackendError::new(format!("{} already released", id)));
        }
        for stage in self.stages.values_mut() {
            if stage.destination == Some(Destination::Stage(id)) {
                stage.destination = None;
            }
        }
        Ok(())
    }

    /// Hops from a stage to the end of its route
    fn depth(&self, id: StageId) -> usize {
        let mut depth = 0;
        let mut cursor = id;
        while let Some(Destination::Stage(next)) = self.stages.get(&cursor).and_then(|s| s.destination) {
            depth += 1;
            cursor = next;
        }
        depth
    }

    /// Render one quantum starting at context time `start`
    ///
    /// Stages are processed furthest-from-output first, so every stage sees
    /// the summed output of all its inputs.
    fn render_quantum(&mut self, start: f64, ended: &mut Vec<StageId>) -> Vec<Vec<f32>> {
        let n = self.quantum;
        let clock = BlockClock {
            start,
            sample_rate: self.sample_rate as f64,
        };
        let block_end = start + n as f64 / clock.sample_rate;

        let mut order: Vec<(usize, StageId)> =
            self.stages.keys().map(|&id| (self.depth(id), id)).collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut inputs: HashMap<StageId, Vec<Vec<f32>>> = HashMap::new();
        let mut output = vec![vec![0.0; n]; OUTPUT_CHANNELS];

        for (_, id) in order {
            let Some(stage) = self.stages.get_mut(&id) else {
                continue;
            };
            let mut block = inputs
                .remove(&id)
                .unwrap_or_else(|| vec![vec![0.0; n]; OUTPUT_CHANNELS]);

            match &mut stage.node {
                Node::Source(source) => {
                    source.render(&mut block, clock);
                    if let Some(schedule) = source.schedule {
                        if !source.ended && block_end >= source.end_time(&schedule) {
                            source.ended = true;
                            ended.push(id);
                        }
                    }
                }
                Node::Gain(gain) => gain.process(&mut block, clock),
                Node::Effect(processor) => processor.process(&mut block, clock),
            }

            let target = match stage.destination {
                Some(Destination::Output) => Some(&mut output),
                Some(Destination::Stage(next)) => Some(
                    inputs
                        .entry(next)
                        .or_insert_with(|| vec![vec![0.0; n]; OUTPUT_CHANNELS]),
                ),
                None => None,
            };
            if let Some(target) = target {
                for (dst, src) in target.iter_mut().zip(&block) {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s;
                    }
                }
            }
        }

        output
    }
}

// ============================================================================
// Live Backend
// ============================================================================

/// In-process live backend
pub struct SoftwareBackend {
    graph: Graph,
    frames_rendered: u64,
    suspended: bool,
    events: Vec<BackendEvent>,
    pending_acks: Vec<TeardownToken>,
    next_token: u64,
    faulty: HashSet<StageId>,
}

impl SoftwareBackend {
    pub fn new(sample_rate: u32, render_quantum: usize) -> Self {
        Self {
            graph: Graph::new(sample_rate, render_quantum),
            frames_rendered: 0,
            suspended: false,
            events: Vec::new(),
            pending_acks: Vec::new(),
            next_token: 1,
            faulty: HashSet::new(),
        }
    }

    /// Frames per render quantum
    pub fn render_quantum(&self) -> usize {
        self.graph.quantum
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Render at least `frames` frames and return what was produced
    ///
    /// While suspended the output is silent and the clock stays put, but
    /// teardown acknowledgments are still delivered.
    pub fn render(&mut self, frames: usize) -> SampleBuffer {
        let quantum = self.graph.quantum;
        let quanta = frames.div_ceil(quantum);
        let sr = self.graph.sample_rate;
        let mut channels = vec![Vec::with_capacity(quanta * quantum); OUTPUT_CHANNELS];

        for _ in 0..quanta {
            if self.suspended {
                for ch in &mut channels {
                    ch.extend(std::iter::repeat(0.0).take(quantum));
                }
            } else {
                let start = self.frames_rendered as f64 / sr as f64;
                let mut ended = Vec::new();
                let block = self.graph.render_quantum(start, &mut ended);
                for (dst, src) in channels.iter_mut().zip(block) {
                    dst.extend(src);
                }
                self.frames_rendered += quantum as u64;
                self.events.extend(ended.into_iter().map(BackendEvent::SourceEnded));
            }
            self.events
                .extend(self.pending_acks.drain(..).map(BackendEvent::TeardownComplete));
        }

        SampleBuffer::new(channels, sr)
    }

    /// Let `seconds` of context time pass, discarding the audio
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds.max(0.0) * self.graph.sample_rate as f64).round() as usize;
        self.render(frames);
    }

    /// Number of live stages
    pub fn stage_count(&self) -> usize {
        self.graph.stages.len()
    }

    /// Current value of a gain stage
    pub fn gain_of(&self, stage: StageId) -> Option<f32> {
        match &self.graph.stages.get(&stage)?.node {
            Node::Gain(gain) => Some(gain.gain()),
            _ => None,
        }
    }

    /// Kinds of the stages a signal passes through from `stage` to output
    pub fn route_of(&self, stage: StageId) -> Vec<&'static str> {
        let mut route = Vec::new();
        let mut cursor = Some(stage);
        while let Some(id) = cursor {
            let Some(s) = self.graph.stages.get(&id) else {
                break;
            };
            route.push(s.kind);
            cursor = match s.destination {
                Some(Destination::Stage(next)) => Some(next),
                _ => None,
            };
        }
        route
    }

    /// Make releases of `stage` fail, as a misbehaving native node would
    pub fn inject_release_fault(&mut self, stage: StageId) {
        self.faulty.insert(stage);
    }
}

impl StageGraph for SoftwareBackend {
    fn sample_rate(&self) -> u32 {
        self.graph.sample_rate
    }

    fn create_stage(&mut self, spec: StageSpec) -> BackendResult<StageId> {
        let id = self.graph.create(spec);
        trace!("created {}", id);
        Ok(id)
    }

    fn connect(&mut self, from: StageId, to: Destination) -> BackendResult {
        self.graph.connect(from, to)
    }

    fn start_source(&mut self, source: StageId, schedule: SourceSchedule) -> BackendResult {
        self.graph.start_source(source, schedule)
    }
}

impl AudioBackend for SoftwareBackend {
    fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.graph.sample_rate as f64
    }

    fn decode(&self, bytes: &[u8]) -> crate::error::Result<SampleBuffer> {
        io::decode_wav(bytes)
    }

    fn set_gain(&mut self, stage: StageId, gain: f32) -> BackendResult {
        self.graph.set_gain(stage, gain)
    }

    fn release(&mut self, stage: StageId) -> BackendResult {
        if self.faulty.contains(&stage) {
            return Err(BackendError::new(format!("{} refused to disconnect", stage)));
        }
        self.graph.release(stage)
    }

    fn suspend(&mut self) -> BackendResult {
        self.suspended = true;
        Ok(())
    }

    fn resume(&mut self) -> BackendResult {
        self.suspended = false;
        Ok(())
    }

    fn reset(&mut self) -> BackendResult {
        debug!("software backend reset ({} stages dropped)", self.graph.stages.len());
        self.graph = Graph::new(self.graph.sample_rate, self.graph.quantum);
        self.frames_rendered = 0;
        self.suspended = false;
        self.faulty.clear();
        Ok(())
    }

    fn request_teardown_ack(&mut self) -> TeardownToken {
        let token = TeardownToken(self.next_token);
        self.next_token += 1;
        self.pending_acks.push(token);
        token
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.events)
    }

    fn offline_context(&self, frames: usize) -> Box<dyn OfflineContext> {
        Box::new(SoftwareOfflineContext {
            graph: Graph::new(self.graph.sample_rate, self.graph.quantum),
            frames,
        })
    }
}

// ============================================================================
// Offline Context
// ============================================================================

/// Offline render context produced by `SoftwareBackend::offline_context`
pub struct SoftwareOfflineContext {
    graph: Graph,
    frames: usize,
}

impl StageGraph for SoftwareOfflineContext {
    fn sample_rate(&self) -> u32 {
        self.graph.sample_rate
    }

    fn create_stage(&mut self, spec: StageSpec) -> BackendResult<StageId> {
        Ok(self.graph.create(spec))
    }

    fn connect(&mut self, from: StageId, to: Destination) -> BackendResult {
        self.graph.connect(from, to)
    }

    fn start_source(&mut self, source: StageId, schedule: SourceSchedule) -> BackendResult {
        self.graph.start_source(source, schedule)
    }
}

impl OfflineContext for SoftwareOfflineContext {
    fn render(mut self: Box<Self>) -> BackendResult<SampleBuffer> {
        let quantum = self.graph.quantum;
        let sr = self.graph.sample_rate as f64;
        let quanta = self.frames.div_ceil(quantum);
        let mut channels = vec![Vec::with_capacity(quanta * quantum); OUTPUT_CHANNELS];
        let mut ended = Vec::new();

        for q in 0..quanta {
            let block = self.graph.render_quantum((q * quantum) as f64 / sr, &mut ended);
            for (dst, src) in channels.iter_mut().zip(block) {
                dst.extend(src);
            }
        }
        for ch in &mut channels {
            ch.truncate(self.frames);
        }

        Ok(SampleBuffer::new(channels, self.graph.sample_rate))
    }
}
