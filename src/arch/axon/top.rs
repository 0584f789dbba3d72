//! AXON core top level.
//!
//! Owns every component and the bank array, and advances them one clock
//! per `tick()` in a fixed intra-cycle order: pipeline, accumulation,
//! scheduler, output manager, frontend, then dispatch and the transfer
//! executors. The host sees only the framed word transport (`push_word` /
//! `pop_word`); everything else is internal state.

use std::collections::VecDeque;

use log::{info, warn};
use serde::Serialize;

use super::accum::AccumEngine;
use super::bank::BankArray;
use super::dispatch::{CommandDispatch, ReadExecutor, ReadSource, WriteExecutor};
use super::frontend::{FrameParser, ParsedCommand};
use super::layer::{LayerConfig, LayerTable};
use super::mapper::compute_snapshot;
use super::output_mgr::{OutputManager, OutputTrigger};
use super::params::{Opcode, PartialSum, StreamWord};
use super::pipeline::PipelineController;
use super::scheduler::{PassDecode, Scheduler};

/// One structured trace entry, streamed out as a JSON line when tracing
/// is enabled.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
  pub cycle: u64,
  pub component: &'static str,
  pub action: &'static str,
  pub detail: String,
}

/// A latched multi-batch compute job.
#[derive(Debug, Clone, Copy)]
struct ComputeJob {
  layer_id: u8,
  num_batches: u16,
  /// Batches launched so far; the batch currently running is
  /// `cur_batch - 1` once the scheduler has started.
  cur_batch: u16,
}

/// Operand buffers staged between the fetch pulse and the compute start.
#[derive(Debug, Clone)]
struct StagedOperands {
  weight: Vec<Vec<PartialSum>>,
  ifmap: Vec<PartialSum>,
}

pub struct AxonCore {
  cycle: u64,
  layers: LayerTable,
  banks: BankArray,
  parser: FrameParser,
  dispatch: CommandDispatch,
  write_exec: Option<WriteExecutor>,
  read_exec: Option<ReadExecutor>,
  scheduler: Scheduler,
  pipeline: PipelineController,
  accum: AccumEngine,
  output_mgr: OutputManager,
  in_queue: VecDeque<StreamWord>,
  out_queue: VecDeque<StreamWord>,
  job: Option<ComputeJob>,
  active_layer: Option<LayerConfig>,
  staged: Option<StagedOperands>,
  /// Internal auto-read finished last cycle.
  read_done_pulse: bool,
  trace: Vec<TraceRecord>,
}

impl AxonCore {
  pub fn new(layers: LayerTable) -> Self {
    Self {
      cycle: 0,
      layers,
      banks: BankArray::new(),
      parser: FrameParser::new(),
      dispatch: CommandDispatch::new(),
      write_exec: None,
      read_exec: None,
      scheduler: Scheduler::new(),
      pipeline: PipelineController::new(),
      accum: AccumEngine::new(),
      output_mgr: OutputManager::new(),
      in_queue: VecDeque::new(),
      out_queue: VecDeque::new(),
      job: None,
      active_layer: None,
      staged: None,
      read_done_pulse: false,
      trace: Vec::new(),
    }
  }

  /// Pre-emptive reset: every component returns to its initial state on
  /// this cycle, regardless of what is in flight.
  pub fn reset(&mut self) {
    self.banks.reset();
    self.parser.reset();
    self.dispatch.reset();
    self.write_exec = None;
    self.read_exec = None;
    self.scheduler.reset();
    self.pipeline.reset();
    self.accum.reset();
    self.output_mgr.reset();
    self.in_queue.clear();
    self.out_queue.clear();
    self.job = None;
    self.active_layer = None;
    self.staged = None;
    self.read_done_pulse = false;
    info!("core reset at cycle {}", self.cycle);
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn push_word(&mut self, word: StreamWord) {
    self.in_queue.push_back(word);
  }

  pub fn push_frame(&mut self, words: &[StreamWord]) {
    self.in_queue.extend(words.iter().copied());
  }

  pub fn pop_word(&mut self) -> Option<StreamWord> {
    self.out_queue.pop_front()
  }

  /// The whole core is quiescent: no command, no job, no delivery, and
  /// nothing left on the input queue.
  pub fn is_idle(&self) -> bool {
    self.in_queue.is_empty()
      && self.dispatch.opcode() == Opcode::Nop
      && self.job.is_none()
      && self.scheduler.is_idle()
      && self.output_mgr.is_idle()
      && self.write_exec.is_none()
      && self.read_exec.is_none()
      && self.pipeline.is_idle()
      && !self.accum.has_pending()
  }

  /// Direct bank inspection, for the host-side golden model and tests.
  pub fn peek_bank(&self, bank: usize, addr: usize) -> PartialSum {
    self.banks.peek(bank, addr)
  }

  /// Conflicts seen on the shared output-bank read port. Stays zero as
  /// long as no drain overlaps an in-flight accumulation.
  pub fn read_port_conflicts(&self) -> u32 {
    self.accum.port_conflicts()
  }

  pub fn take_trace(&mut self) -> Vec<TraceRecord> {
    std::mem::take(&mut self.trace)
  }

  fn record(&mut self, component: &'static str, action: &'static str, detail: String) {
    self.trace.push(TraceRecord {
      cycle: self.cycle,
      component,
      action,
      detail,
    });
  }

  /// Advance one clock.
  pub fn tick(&mut self) {
    // Compute side
    let pipe_out = self.pipeline.tick();
    self.accum.tick(pipe_out.eject, &mut self.banks);
    let sched_out = self.scheduler.tick(pipe_out.done);

    if let Some(decode) = &sched_out.fetch {
      self.stage_pass(decode);
    }
    if let Some(n) = sched_out.compute_start {
      match self.staged.take() {
        Some(ops) => self.pipeline.start(n as u32, ops.weight, ops.ifmap),
        None => warn!("compute start with no staged operands"),
      }
    }

    // Result delivery
    let trigger = if sched_out.batch_complete {
      self.batch_finished()
    } else {
      None
    };
    let read_done = std::mem::take(&mut self.read_done_pulse);
    let mgr_out = self.output_mgr.tick(trigger, read_done);
    if let Some(word) = mgr_out.header_word {
      self.out_queue.push_back(word);
    }

    // Host side
    let front_out = self.parser.tick(self.in_queue.front().copied(), true);
    if front_out.consumed {
      self.in_queue.pop_front();
    }
    if let Some(cmd) = front_out.header_valid {
      self.handle_command(cmd);
    }
    if let Some(word) = front_out.payload {
      self.handle_payload(word);
    }

    // Read mux and drain executor
    if self.read_exec.is_none() {
      if let Some(req) = self.dispatch.read_request(mgr_out.auto_read.as_ref()) {
        self.read_exec = Some(ReadExecutor::new(req));
      }
    }
    if let Some(mut reader) = self.read_exec.take() {
      let out = reader.tick(&mut self.accum, &mut self.banks);
      if let Some(word) = out.word {
        self.out_queue.push_back(word);
      }
      if out.done {
        match reader.source() {
          ReadSource::External => {
            self.dispatch.complete();
            self.record("dispatch", "read_complete", String::new());
          }
          ReadSource::Internal => self.read_done_pulse = true,
        }
      } else {
        self.read_exec = Some(reader);
      }
    }

    self.launch_next_batch();
    self.cycle += 1;
  }

  /// Run until the core goes quiescent, bounded by `max_cycles`.
  pub fn run_until_idle(&mut self, max_cycles: u64) -> u64 {
    let start = self.cycle;
    while !self.is_idle() && self.cycle - start < max_cycles {
      self.tick();
    }
    self.cycle - start
  }

  fn handle_command(&mut self, cmd: ParsedCommand) {
    if cmd.magic_error {
      self.record("frontend", "bad_magic", format!("code {:#04x}", cmd.code));
      return; // frame is drained but never executed
    }
    match self.dispatch.latch(cmd) {
      Ok(Opcode::WriteWeight) | Ok(Opcode::WriteIfmap) => {
        // Window already validated by the latch
        if let Ok(window) = self.dispatch.window() {
          self.write_exec = Some(WriteExecutor::new(cmd.bank_start, cmd.bank_end, window));
        }
        self.record("dispatch", "write_start", format!("banks {}..={}", cmd.bank_start, cmd.bank_end));
      }
      Ok(Opcode::ReadResult) => {
        self.record("dispatch", "read_start", format!("banks {}..={}", cmd.bank_start, cmd.bank_end));
      }
      Ok(Opcode::StartCompute) => self.start_job(cmd),
      Ok(Opcode::Nop) => {}
      Err(e) => {
        warn!("command rejected: {}", e);
        self.record("dispatch", "rejected", e.to_string());
      }
    }
  }

  fn handle_payload(&mut self, word: StreamWord) {
    if let Some(mut writer) = self.write_exec.take() {
      if writer.push(word, &mut self.banks) {
        self.dispatch.complete();
        self.record("dispatch", "write_complete", String::new());
      } else {
        self.write_exec = Some(writer);
      }
    }
    // Payload of a command with no executor (StartCompute dummy word,
    // rejected frame) drains into nothing.
  }

  fn start_job(&mut self, cmd: ParsedCommand) {
    let layer_id = cmd.bank_start;
    let layer = match self.layers.get(layer_id) {
      Ok(l) => l.clone(),
      Err(e) => {
        warn!("compute launch rejected: {}", e);
        self.record("dispatch", "rejected", e.to_string());
        self.dispatch.complete();
        return;
      }
    };
    let num_batches = if cmd.addr_count == 0 {
      layer.num_batches
    } else {
      cmd.addr_count
    };
    info!("compute job: layer {} over {} batches", layer_id, num_batches);
    self.record("core", "job_start", format!("layer {} batches {}", layer_id, num_batches));
    // Batch 0 launches from `launch_next_batch`, which waits for the
    // previous job's delivery drain to release the output read port.
    self.active_layer = Some(layer);
    self.job = Some(ComputeJob {
      layer_id,
      num_batches,
      cur_batch: 0,
    });
  }

  /// Latch the operand buffers and destination snapshot for a pass.
  fn stage_pass(&mut self, decode: &PassDecode) {
    let layer = match &self.active_layer {
      Some(l) => l.clone(),
      None => {
        warn!("fetch pulse with no active layer");
        return;
      }
    };

    self
      .accum
      .load_snapshot(compute_snapshot(&layer, decode.row_in_tile, decode.tile_in_batch));

    let n = layer.num_iterations as usize;

    // Weight stream per lane: wrap within the lane's window
    let weight = decode
      .weight
      .iter()
      .map(|(bank, window)| {
        let len = window.len();
        (0..n)
          .map(|k| self.banks.peek(*bank as usize, window.addr_start as usize + k % len))
          .collect()
      })
      .collect();

    // Shared ifmap stream: enabled banks concatenated in order, wrapping
    // over the combined span
    let ifmap_banks: Vec<usize> = (0..decode.ifmap_banks.len())
      .filter(|&b| decode.ifmap_banks[b])
      .collect();
    let len = decode.ifmap_window.len();
    let span = ifmap_banks.len() * len;
    let ifmap = (0..n)
      .map(|k| {
        let k = k % span;
        let bank = ifmap_banks[k / len];
        self.banks.peek(bank, decode.ifmap_window.addr_start as usize + k % len)
      })
      .collect();

    self.staged = Some(StagedOperands { weight, ifmap });
  }

  /// A batch just drained; build the result trigger and advance the job.
  fn batch_finished(&mut self) -> Option<OutputTrigger> {
    let job = self.job.as_ref()?;
    let layer = self.active_layer.as_ref()?;
    let finished = job.cur_batch - 1;
    let all_done = job.cur_batch == job.num_batches;
    let trigger = Self::result_trigger(layer, job.layer_id, finished, all_done);
    self.record("core", "batch_complete", format!("batch {} all_done {}", finished, all_done));
    if all_done {
      // The instruction register clears only now
      self.dispatch.complete();
    }
    Some(trigger)
  }

  /// Tile ids in the result header are 16-bit wire words; jobs long
  /// enough to run past the 16-bit range truncate to the low bits.
  fn result_trigger(layer: &LayerConfig, layer_id: u8, finished: u16, all_done: bool) -> OutputTrigger {
    let tile_start = finished as u32 * layer.tiles_per_batch as u32;
    let tile_end = tile_start + layer.tiles_per_batch as u32 - 1;
    OutputTrigger {
      batch_id: finished,
      layer_id,
      tile_start: tile_start as u16,
      tile_end: tile_end as u16,
      all_done,
    }
  }

  /// Start the next batch (including a fresh job's first) once the
  /// previous delivery has fully drained; the delivery read and the
  /// accumulation engine share the output banks' read port and must not
  /// overlap.
  fn launch_next_batch(&mut self) {
    let Some(job) = self.job else { return };
    if !self.scheduler.is_idle() || !self.output_mgr.is_idle() || self.read_exec.is_some() {
      return;
    }
    if job.cur_batch >= job.num_batches {
      self.job = None;
      self.active_layer = None;
      self.record("core", "job_complete", String::new());
      return;
    }
    self.job = Some(ComputeJob {
      cur_batch: job.cur_batch + 1,
      ..job
    });
    if let Some(layer) = self.active_layer.clone() {
      self.scheduler.start(layer, job.cur_batch);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::frontend::encode_frame;
  use crate::arch::axon::params::{IFMAP_BANK_BASE, OUT_BANK_BASE, Word};

  fn core() -> AxonCore {
    AxonCore::new(LayerTable::new())
  }

  fn run(core: &mut AxonCore, cycles: u64) {
    for _ in 0..cycles {
      core.tick();
    }
  }

  #[test]
  fn test_write_frame_lands_in_banks() {
    let mut c = core();
    // One address, banks 0..=1: two payload words
    c.push_frame(&encode_frame(1, 0, 1, 0x20, 1, &[7, 0xFFF9]));
    run(&mut c, 20);
    assert_eq!(c.peek_bank(0, 0x20), 7);
    assert_eq!(c.peek_bank(1, 0x20), -7);
    assert!(c.is_idle());
  }

  #[test]
  fn test_read_frame_returns_saturated_words() {
    let mut c = core();
    c.push_frame(&encode_frame(1, 24, 24, 0, 2, &[100, 200]));
    run(&mut c, 20);

    c.push_frame(&encode_frame(3, 24, 24, 0, 2, &[]));
    run(&mut c, 30);

    let words: Vec<StreamWord> = std::iter::from_fn(|| c.pop_word()).collect();
    assert_eq!(words.len(), 2);
    assert_eq!(words[0].data, 100);
    assert_eq!(words[1].data, 200);
    assert!(words[1].last);
  }

  #[test]
  fn test_bad_magic_frame_is_drained_not_executed() {
    let mut c = core();
    let mut frame = encode_frame(1, 0, 0, 0, 1, &[55]);
    frame[0] = StreamWord::new(0xBEEF);
    c.push_frame(&frame);
    run(&mut c, 20);
    assert_eq!(c.peek_bank(0, 0), 0);
    assert!(c.is_idle());
    // A following well-formed frame still executes
    c.push_frame(&encode_frame(1, 0, 0, 0, 1, &[55]));
    run(&mut c, 20);
    assert_eq!(c.peek_bank(0, 0), 55);
  }

  #[test]
  fn test_rejected_window_leaves_dispatch_clear() {
    let mut c = core();
    // Window runs past the bank depth
    c.push_frame(&encode_frame(1, 0, 0, 0x1F0, 0x20, &[0; 0x20]));
    run(&mut c, 100);
    assert!(c.is_idle());
    assert_eq!(c.peek_bank(0, 0x1F0), 0);
  }

  fn load_test_patterns(c: &mut AxonCore, layer: &LayerConfig) {
    // Weights ((f + k) % 5) + 1 striped the way the fetch reads them
    for lane in 0..crate::arch::axon::params::NUM_PE {
      let bank = lane % layer.weight_windows as usize;
      let words: Vec<Word> = (0..layer.num_iterations as usize)
        .map(|k| (((lane + k) % 5) + 1) as Word)
        .collect();
      // Each lane group shares a bank; later lanes in the group overwrite
      // earlier ones, so only write lane == bank's first occupant
      if lane == bank {
        c.push_frame(&encode_frame(1, bank as u8, bank as u8, 0, words.len() as u16, &words));
      }
    }
    // Ifmap ((t % 5) + 1 in the first ifmap bank's first window
    let words: Vec<Word> = (0..layer.ifmap_window_len as usize)
      .map(|t| ((t % 5) + 1) as Word)
      .collect();
    c.push_frame(&encode_frame(
      2,
      IFMAP_BANK_BASE as u8,
      IFMAP_BANK_BASE as u8,
      0,
      words.len() as u16,
      &words,
    ));
    run(c, 4000);
    assert!(c.is_idle());
  }

  #[test]
  fn test_compute_job_runs_to_completion() {
    let mut c = core();
    let layer = LayerTable::new().get(0).unwrap().clone();
    load_test_patterns(&mut c, &layer);

    // Launch layer 0, one batch
    c.push_frame(&encode_frame(4, 0, 0, 0, 1, &[]));
    let spent = c.run_until_idle(200_000);
    assert!(c.is_idle(), "job did not finish");
    assert!(spent > layer.max_passes() as u64); // sanity: real work happened

    // Final delivery: full-data header on the output stream
    let words: Vec<StreamWord> = std::iter::from_fn(|| c.pop_word()).collect();
    assert_eq!(words[0].data, 0xDA7A);
    assert_eq!(words[1].data, 0x0002);
    assert_eq!(words[5].data, 4096);
    // Header plus the full output-region drain
    assert_eq!(words.len(), 6 + 4096);
    assert!(words.last().map(|w| w.last).unwrap_or(false));
  }

  #[test]
  fn test_accumulation_survives_across_batches() {
    let mut table = LayerTable::new();
    let mut layer = table.get(0).unwrap().clone();
    layer.num_batches = 2;
    table.override_layer(layer.clone()).unwrap();
    let mut c = AxonCore::new(table);

    load_test_patterns(&mut c, &layer);

    c.push_frame(&encode_frame(4, 0, 0, 0, 0, &[])); // 0 = layer default batches
    c.run_until_idle(500_000);
    assert!(c.is_idle());

    // Both batches target the same output cells: batch 1 accumulated on
    // top of batch 0, so every written cell holds an even doubled sum
    let single = {
      let mut one = core();
      load_test_patterns(&mut one, &layer);
      one.push_frame(&encode_frame(4, 0, 0, 0, 1, &[]));
      one.run_until_idle(500_000);
      one.peek_bank(OUT_BANK_BASE, 0)
    };
    assert_eq!(c.peek_bank(OUT_BANK_BASE, 0), 2 * single);

    // Intermediate notification plus the final full-data frame
    let words: Vec<StreamWord> = std::iter::from_fn(|| c.pop_word()).collect();
    assert_eq!(words[0].data, 0xC0DE);
    assert_eq!(words[1].data, 0x0001);
    let full_at = 6 + 512;
    assert_eq!(words[full_at].data, 0xDA7A);
  }

  #[test]
  fn test_result_trigger_tile_ids_truncate_to_wire_width() {
    let layer = LayerTable::new().get(0).unwrap().clone(); // 4 tiles per batch
    let t = AxonCore::result_trigger(&layer, 0, 16383, false);
    assert_eq!(t.tile_start, 65532);
    assert_eq!(t.tile_end, 65535);
    // The next batch crosses the 16-bit boundary without panicking
    let t = AxonCore::result_trigger(&layer, 0, 16384, false);
    assert_eq!(t.batch_id, 16384);
    assert_eq!(t.tile_start, 0);
    assert_eq!(t.tile_end, 3);
  }

  #[test]
  fn test_unknown_layer_launch_is_rejected() {
    let mut c = core();
    c.push_frame(&encode_frame(4, 9, 0, 0, 1, &[]));
    run(&mut c, 30);
    assert!(c.is_idle());
    assert!(c.pop_word().is_none());
  }

  #[test]
  fn test_reset_is_preemptive() {
    let mut c = core();
    c.push_frame(&encode_frame(1, 0, 3, 0, 64, &[1; 256]));
    run(&mut c, 10); // mid-frame
    c.reset();
    assert!(c.is_idle());
    assert_eq!(c.peek_bank(0, 0), 0);
    // Core accepts fresh frames immediately
    c.push_frame(&encode_frame(1, 0, 0, 0, 1, &[9]));
    run(&mut c, 20);
    assert_eq!(c.peek_bank(0, 0), 9);
  }
}
