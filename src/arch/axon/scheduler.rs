//! Pass scheduler.
//!
//! Decomposes one batch of a layer into `rows_per_tile * tiles_per_batch`
//! passes and walks each pass through the fetch / compute handshake:
//! StartAll raises the operand fetch for the pass, WaitMem holds for the
//! fixed bank read latency, StartCompute pulses the pipeline start, and
//! WaitCompute blocks on the pipeline's drain flag. The decode of the
//! following pass is computed during StartCompute and held in a register
//! until re-entry to StartAll, so no pass ever derives its geometry
//! combinationally from the previous one's completion.

use log::{debug, info};

use super::addr_gen::{AddressWindow, ParallelSweep};
use super::layer::LayerConfig;
use super::params::{BANK_DEPTH, IFMAP_BANK_BASE, MEM_READ_WAIT, NUM_BANKS, NUM_PE, WEIGHT_BANK_BASE};

/// Fully decoded geometry of one pass, a pure function of
/// `(layer, batch_id, pass_index)`.
#[derive(Debug, Clone)]
pub struct PassDecode {
  pub pass_index: u32,
  pub tile_in_batch: u16,
  pub row_in_tile: u16,
  pub absolute_tile_id: u32,
  /// Address window swept across every enabled ifmap bank in parallel.
  pub ifmap_window: AddressWindow,
  pub ifmap_banks: [bool; NUM_BANKS],
  /// Weight source per lane: bank and the address window inside it.
  pub weight: [(u8, AddressWindow); NUM_PE],
}

/// Decode the geometry of one pass.
///
/// Row is the fast axis: `pass = tile_in_batch * rows_per_tile + row`.
/// The ifmap window rotates through each ifmap bank by absolute tile id;
/// lane `l` draws weights from bank `l mod weight_windows`, with the
/// window inside the bank selected by the row.
pub fn decode_pass(layer: &LayerConfig, batch_id: u16, pass_index: u32) -> PassDecode {
  let rows = layer.rows_per_tile as u32;
  let tile_in_batch = (pass_index / rows) as u16;
  let row_in_tile = (pass_index % rows) as u16;
  let absolute_tile_id = batch_id as u32 * layer.tiles_per_batch as u32 + tile_in_batch as u32;

  let ilen = layer.ifmap_window_len as u32;
  let islots = BANK_DEPTH as u32 / ilen;
  let istart = (absolute_tile_id % islots) * ilen;
  let ifmap_window = AddressWindow {
    addr_start: istart as u16,
    addr_end: (istart + ilen - 1) as u16,
  };
  let ifmap_banks = ParallelSweep::range_mask(
    IFMAP_BANK_BASE,
    IFMAP_BANK_BASE + layer.ifmap_windows as usize - 1,
  );

  let wlen = layer.weight_window_len as u32;
  let wslots = BANK_DEPTH as u32 / wlen;
  let widx = (row_in_tile as u32 / layer.weight_windows as u32) % wslots;
  let wstart = widx * wlen;
  let wwindow = AddressWindow {
    addr_start: wstart as u16,
    addr_end: (wstart + wlen - 1) as u16,
  };
  let mut weight = [(0u8, wwindow); NUM_PE];
  for (lane, slot) in weight.iter_mut().enumerate() {
    slot.0 = (WEIGHT_BANK_BASE + lane % layer.weight_windows as usize) as u8;
  }

  PassDecode {
    pass_index,
    tile_in_batch,
    row_in_tile,
    absolute_tile_id,
    ifmap_window,
    ifmap_banks,
    weight,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedState {
  Idle,
  StartAll,
  WaitMem(u32),
  StartCompute,
  WaitCompute,
  Done,
}

/// One-cycle scheduler outputs.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOutput {
  /// Operand fetch pulse with the pass geometry, raised in StartAll.
  pub fetch: Option<PassDecode>,
  /// Pipeline start pulse carrying the contraction length.
  pub compute_start: Option<u16>,
  /// One-cycle pulse after the final pass of the batch.
  pub batch_complete: bool,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
  state: SchedState,
  layer: Option<LayerConfig>,
  batch_id: u16,
  pass_index: u32,
  current: Option<PassDecode>,
  next: Option<PassDecode>,
}

impl Scheduler {
  pub fn new() -> Self {
    Self {
      state: SchedState::Idle,
      layer: None,
      batch_id: 0,
      pass_index: 0,
      current: None,
      next: None,
    }
  }

  pub fn reset(&mut self) {
    self.state = SchedState::Idle;
    self.layer = None;
    self.batch_id = 0;
    self.pass_index = 0;
    self.current = None;
    self.next = None;
  }

  pub fn is_idle(&self) -> bool {
    self.state == SchedState::Idle
  }

  pub fn pass_index(&self) -> u32 {
    self.pass_index
  }

  /// Launch one batch of a layer.
  pub fn start(&mut self, layer: LayerConfig, batch_id: u16) {
    info!("scheduler: layer {} batch {} ({} passes)", layer.layer_id, batch_id, layer.max_passes());
    self.pass_index = 0;
    self.batch_id = batch_id;
    self.current = Some(decode_pass(&layer, batch_id, 0));
    self.next = None;
    self.layer = Some(layer);
    self.state = SchedState::StartAll;
  }

  /// Advance one cycle.
  pub fn tick(&mut self, pipeline_done: bool) -> SchedulerOutput {
    let mut out = SchedulerOutput::default();

    match self.state {
      SchedState::Idle => {}
      SchedState::StartAll => {
        out.fetch = self.current.clone();
        self.state = SchedState::WaitMem(MEM_READ_WAIT);
      }
      SchedState::WaitMem(n) => {
        self.state = if n <= 1 {
          SchedState::StartCompute
        } else {
          SchedState::WaitMem(n - 1)
        };
      }
      SchedState::StartCompute => {
        if let Some(layer) = &self.layer {
          out.compute_start = Some(layer.num_iterations);
          // Decode the following pass now, consumed on re-entry to StartAll
          if self.pass_index + 1 < layer.max_passes() {
            self.next = Some(decode_pass(layer, self.batch_id, self.pass_index + 1));
          }
        }
        self.state = SchedState::WaitCompute;
      }
      SchedState::WaitCompute => {
        if pipeline_done {
          if let Some(next) = self.next.take() {
            debug!("pass {} done, advancing to {}", self.pass_index, next.pass_index);
            self.pass_index = next.pass_index;
            self.current = Some(next);
            self.state = SchedState::StartAll;
          } else {
            self.state = SchedState::Done;
          }
        }
      }
      SchedState::Done => {
        out.batch_complete = true;
        self.pass_index = 0;
        self.state = SchedState::Idle;
      }
    }

    out
  }
}

impl Default for Scheduler {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::layer::LayerTable;

  fn layer(id: u8) -> LayerConfig {
    LayerTable::new().get(id).unwrap().clone()
  }

  /// Drive the scheduler through a whole batch, faking a pipeline that
  /// drains `drain_cycles` ticks after its start pulse.
  fn run_batch(sched: &mut Scheduler, drain_cycles: u32, limit: u32) -> (Vec<PassDecode>, u32) {
    let mut fetches = Vec::new();
    let mut completes = 0;
    let mut countdown = None;
    for _ in 0..limit {
      let done = match countdown {
        Some(0) => {
          countdown = None;
          true
        }
        Some(n) => {
          countdown = Some(n - 1);
          false
        }
        None => false,
      };
      let out = sched.tick(done);
      if let Some(d) = out.fetch {
        fetches.push(d);
      }
      if out.compute_start.is_some() {
        countdown = Some(drain_cycles);
      }
      if out.batch_complete {
        completes += 1;
      }
      if sched.is_idle() && completes > 0 {
        break;
      }
    }
    (fetches, completes)
  }

  #[test]
  fn test_layer0_pass_sweep_order() {
    let mut sched = Scheduler::new();
    sched.start(layer(0), 0);
    let (fetches, completes) = run_batch(&mut sched, 2, 20_000);

    assert_eq!(fetches.len(), 128);
    assert_eq!(completes, 1);
    for (i, d) in fetches.iter().enumerate() {
      // Row is the fast axis of the sweep
      assert_eq!(d.pass_index, i as u32);
      assert_eq!(d.tile_in_batch, (i as u16) >> 5);
      assert_eq!(d.row_in_tile, (i as u16) & 31);
    }
  }

  #[test]
  fn test_wait_mem_hold() {
    let mut sched = Scheduler::new();
    sched.start(layer(0), 0);

    let out = sched.tick(false);
    assert!(out.fetch.is_some());
    // MEM_READ_WAIT hold cycles before the start pulse
    for _ in 0..MEM_READ_WAIT {
      let out = sched.tick(false);
      assert!(out.compute_start.is_none());
    }
    let out = sched.tick(false);
    assert_eq!(out.compute_start, Some(65));
  }

  #[test]
  fn test_ifmap_window_rotates_with_tile() {
    // Layer 0: 256-word windows, 2 slots per bank
    let l = layer(0);
    let d0 = decode_pass(&l, 0, 0);
    assert_eq!(d0.ifmap_window.addr_start, 0);
    assert_eq!(d0.ifmap_window.addr_end, 255);
    assert!(d0.ifmap_banks[IFMAP_BANK_BASE]);
    assert!(d0.ifmap_banks[IFMAP_BANK_BASE + 1]);
    assert!(!d0.ifmap_banks[IFMAP_BANK_BASE + 2]);

    let d1 = decode_pass(&l, 0, l.rows_per_tile as u32); // tile 1
    assert_eq!(d1.ifmap_window.addr_start, 256);

    let d2 = decode_pass(&l, 0, 2 * l.rows_per_tile as u32); // tile 2 wraps
    assert_eq!(d2.ifmap_window.addr_start, 0);
  }

  #[test]
  fn test_weight_banks_stripe_across_lanes() {
    let l = layer(0); // 4 weight windows
    let d = decode_pass(&l, 0, 0);
    for lane in 0..NUM_PE {
      assert_eq!(d.weight[lane].0 as usize, WEIGHT_BANK_BASE + lane % 4);
    }
    // Row advances the window inside the bank every weight_windows rows
    let d4 = decode_pass(&l, 0, 4);
    assert_eq!(d4.weight[0].1.addr_start, 256);
    let d8 = decode_pass(&l, 0, 8); // wraps: 2 slots of 256 in a 512 bank
    assert_eq!(d8.weight[0].1.addr_start, 0);
  }

  #[test]
  fn test_batch_id_offsets_absolute_tile() {
    let l = layer(1);
    let d = decode_pass(&l, 3, 0);
    assert_eq!(d.absolute_tile_id, 3 * l.tiles_per_batch as u32);
  }

  #[test]
  fn test_batch_complete_is_single_pulse() {
    let mut sched = Scheduler::new();
    sched.start(layer(0), 0);
    let (_, completes) = run_batch(&mut sched, 2, 20_000);
    assert_eq!(completes, 1);
    // Idle afterwards: further ticks emit nothing
    for _ in 0..10 {
      let out = sched.tick(true);
      assert!(!out.batch_complete && out.fetch.is_none() && out.compute_start.is_none());
    }
  }
}
