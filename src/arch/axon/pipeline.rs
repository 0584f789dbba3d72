//! Systolic pipeline controller.
//!
//! Drives the NUM_PE-lane array for exactly one pass. Lane `i` consumes
//! one operand pair per cycle while `i <= phase < i + num_iterations`,
//! accumulating weight * ifmap, and ejects its accumulator at the single
//! cycle `phase == i + num_iterations`. The triangular skew means every
//! lane ejects exactly once, on consecutive cycles, with no stalls after
//! the start pulse. Ejected values carry no buffering: the consumer must
//! take them the cycle they appear.

use log::debug;

use super::params::{LaneAcc, NUM_PE, PartialSum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
  Idle,
  Running,
}

/// Per-cycle controller output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOutput {
  /// Lane ejecting this cycle, with its accumulated value.
  pub eject: Option<(usize, LaneAcc)>,
  /// Full-drain flag: all lanes have ejected.
  pub done: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineController {
  state: PipelineState,
  phase: u32,
  num_iterations: u32,
  lane_acc: [LaneAcc; NUM_PE],
  /// Operand streams for the pass: one weight stream per lane, one shared
  /// ifmap stream, both `num_iterations` taps long.
  weight_ops: Vec<Vec<PartialSum>>,
  ifmap_ops: Vec<PartialSum>,
}

impl PipelineController {
  pub fn new() -> Self {
    Self {
      state: PipelineState::Idle,
      phase: 0,
      num_iterations: 0,
      lane_acc: [0; NUM_PE],
      weight_ops: Vec::new(),
      ifmap_ops: Vec::new(),
    }
  }

  pub fn reset(&mut self) {
    self.state = PipelineState::Idle;
    self.phase = 0;
    self.num_iterations = 0;
    self.lane_acc = [0; NUM_PE];
    self.weight_ops.clear();
    self.ifmap_ops.clear();
  }

  pub fn is_idle(&self) -> bool {
    self.state == PipelineState::Idle
  }

  pub fn phase(&self) -> u32 {
    self.phase
  }

  /// Start one pass. `weight_ops` holds one stream per lane; both streams
  /// must cover `num_iterations` taps.
  pub fn start(&mut self, num_iterations: u32, weight_ops: Vec<Vec<PartialSum>>, ifmap_ops: Vec<PartialSum>) {
    debug_assert_eq!(weight_ops.len(), NUM_PE);
    debug_assert!(weight_ops.iter().all(|w| w.len() >= num_iterations as usize));
    debug_assert!(ifmap_ops.len() >= num_iterations as usize);

    self.state = PipelineState::Running;
    self.phase = 0;
    self.num_iterations = num_iterations;
    self.lane_acc = [0; NUM_PE];
    self.weight_ops = weight_ops;
    self.ifmap_ops = ifmap_ops;
    debug!("pipeline start: num_iterations={}", num_iterations);
  }

  /// Advance one cycle.
  pub fn tick(&mut self) -> PipelineOutput {
    let mut out = PipelineOutput::default();
    if self.state == PipelineState::Idle {
      return out;
    }

    let n = self.num_iterations;
    for lane in 0..NUM_PE {
      let lane_u = lane as u32;
      if self.phase >= lane_u && self.phase < lane_u + n {
        // Loading/accumulating: tap index is the lane-relative phase
        let k = (self.phase - lane_u) as usize;
        let w = self.weight_ops[lane][k] as LaneAcc;
        let x = self.ifmap_ops[k] as LaneAcc;
        self.lane_acc[lane] += w * x;
      } else if self.phase == lane_u + n {
        out.eject = Some((lane, self.lane_acc[lane]));
      }
    }

    self.phase += 1;
    if self.phase >= (NUM_PE as u32 - 1) + n + 1 {
      out.done = true;
      self.state = PipelineState::Idle;
      debug!("pipeline drained at phase {}", self.phase);
    }

    out
  }
}

impl Default for PipelineController {
  fn default() -> Self {
    Self::new()
  }
}
