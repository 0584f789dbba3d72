//! Workload-driving simulator around the AXON core.
//!
//! Builds the host-side frames for one layer (weights and ifmap filled
//! with the bring-up data patterns), pushes them through the framed
//! transport, launches the compute job and runs the core to quiescence,
//! draining result frames as they appear. Step mode hands cycle control
//! to the interactive shell.

use std::fs::File;
use std::io::{self, BufWriter, Result, Write};

use log::info;

use crate::arch::axon::frontend::encode_frame;
use crate::arch::axon::layer::LayerTable;
use crate::arch::axon::params::{
  BANK_DEPTH, IFMAP_BANK_BASE, Opcode, StreamWord, WEIGHT_BANK_BASE, Word,
};
use crate::arch::axon::top::AxonCore;

use super::sim::mode::{SimConfig, StepMode};
use super::sim::shell::{Command, Shell};
use super::utils::log::set_quiet;

/// Bring-up data patterns, shared with the hardware testbench.
pub fn weight_pattern(filter: usize, tap: usize) -> Word {
  (((filter + tap) % 5) + 1) as Word
}

pub fn ifmap_pattern(channel: usize, t: usize) -> Word {
  (((channel + t) % 5) + 1) as Word
}

pub struct Simulator {
  config: SimConfig,
  core: AxonCore,
  trace_writer: Option<BufWriter<File>>,
  result_words: Vec<StreamWord>,
}

impl Simulator {
  pub fn new(config: SimConfig, layers: LayerTable) -> Result<Self> {
    let trace_writer = match &config.trace_file {
      Some(path) if !path.is_empty() => Some(BufWriter::new(File::create(path)?)),
      _ => None,
    };
    Ok(Self {
      config,
      core: AxonCore::new(layers),
      trace_writer,
      result_words: Vec::new(),
    })
  }

  pub fn core(&self) -> &AxonCore {
    &self.core
  }

  pub fn result_words(&self) -> &[StreamWord] {
    &self.result_words
  }

  pub fn run(&mut self) -> Result<()> {
    if self.config.quiet {
      set_quiet();
    }
    self.load_workload();

    match self.config.step_mode {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    }
  }

  /// Queue the full workload for the configured layer: every weight and
  /// ifmap bank filled with the bring-up patterns, then the compute
  /// launch.
  fn load_workload(&mut self) {
    let layer = self.config.layer;
    let batches = self.config.batches;

    for bank in WEIGHT_BANK_BASE..IFMAP_BANK_BASE {
      let filter = bank - WEIGHT_BANK_BASE;
      let words: Vec<Word> = (0..BANK_DEPTH).map(|k| weight_pattern(filter, k)).collect();
      self.core.push_frame(&encode_frame(
        Opcode::WriteWeight.code(),
        bank as u8,
        bank as u8,
        0,
        BANK_DEPTH as u16,
        &words,
      ));
    }
    for bank in IFMAP_BANK_BASE..crate::arch::axon::params::OUT_BANK_BASE {
      let channel = bank - IFMAP_BANK_BASE;
      let words: Vec<Word> = (0..BANK_DEPTH).map(|t| ifmap_pattern(channel, t)).collect();
      self.core.push_frame(&encode_frame(
        Opcode::WriteIfmap.code(),
        bank as u8,
        bank as u8,
        0,
        BANK_DEPTH as u16,
        &words,
      ));
    }
    self
      .core
      .push_frame(&encode_frame(Opcode::StartCompute.code(), layer, 0, 0, batches, &[]));
    info!("workload queued: layer {} batches {}", layer, if batches == 0 { "default".into() } else { batches.to_string() });
  }

  fn run_continuous(&mut self) -> Result<()> {
    // Generous bound: the largest layer is ~400k cycles per batch
    let limit = 50_000_000u64;
    while !self.core.is_idle() && self.core.cycle() < limit {
      self.step(1)?;
    }
    if !self.core.is_idle() {
      return Err(io::Error::new(io::ErrorKind::TimedOut, "core did not go idle"));
    }
    self.report();
    Ok(())
  }

  fn run_step_mode(&mut self) -> Result<()> {
    let mut shell = Shell::new()?;
    println!("Step mode - Enter steps one cycle, 'si N' steps N, 'c' runs to idle, 'q' quits");
    loop {
      match shell.read_command()? {
        Command::Step(n) => {
          self.step(n as u64)?;
          println!("cycle {}", self.core.cycle());
        }
        Command::Continue => {
          self.run_continuous()?;
          return Ok(());
        }
        Command::Quit => {
          self.report();
          return Ok(());
        }
      }
      if self.core.is_idle() {
        self.report();
        return Ok(());
      }
    }
  }

  fn step(&mut self, cycles: u64) -> Result<()> {
    for _ in 0..cycles {
      self.core.tick();
      while let Some(word) = self.core.pop_word() {
        self.result_words.push(word);
      }
    }
    if let Some(writer) = &mut self.trace_writer {
      for record in self.core.take_trace() {
        let line = serde_json::to_string(&record)
          .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{}", line)?;
      }
    }
    Ok(())
  }

  fn report(&mut self) {
    if let Some(writer) = &mut self.trace_writer {
      let _ = writer.flush();
    }
    let frames = self.result_words.iter().filter(|w| w.last).count();
    info!(
      "done: {} cycles, {} result words in {} frame(s)",
      self.core.cycle(),
      self.result_words.len(),
      frames
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::params::DATA_MAGIC;

  #[test]
  fn test_workload_runs_layer0_to_idle() {
    let config = SimConfig {
      layer: 0,
      ..SimConfig::default()
    };
    let mut sim = Simulator::new(config, LayerTable::new()).unwrap();
    sim.run().unwrap();

    assert!(sim.core().is_idle());
    // The job ends with a full-data delivery of the output region
    let words = sim.result_words();
    assert_eq!(words[0].data, DATA_MAGIC);
    assert_eq!(words.len(), 6 + 4096);
  }

  #[test]
  fn test_patterns_match_testbench() {
    assert_eq!(weight_pattern(0, 0), 1);
    assert_eq!(weight_pattern(3, 4), 3);
    assert_eq!(ifmap_pattern(2, 8), 1);
    // Never zero, never above 5
    for f in 0..16 {
      for k in 0..600 {
        let w = weight_pattern(f, k);
        assert!((1..=5).contains(&w));
      }
    }
  }
}
