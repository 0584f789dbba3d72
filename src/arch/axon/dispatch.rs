//! Command dispatch and the bulk-transfer executors.
//!
//! The dispatch latches one decoded command at a time into its instruction
//! register and validates it up front; an ill-formed command never latches
//! (the register stays Nop and the error surfaces to the caller). The
//! completion pulse clears the register, so a finished command can never
//! re-trigger. Read requests are multiplexed between the host's latched
//! ReadResult and the output manager's auto-read; the internal source wins
//! whenever asserted.

use log::{debug, warn};

use super::accum::AccumEngine;
use super::addr_gen::{AddressWindow, BankSweep, ParallelSweep};
use super::bank::BankArray;
use super::error::{AxonError, Result};
use super::frontend::ParsedCommand;
use super::output_mgr::AutoReadReq;
use super::params::{BANK_DEPTH, NUM_BANKS, Opcode, StreamWord, extend_word, saturate_word};

/// Who owns the read port for the current drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
  /// Host-issued ReadResult command.
  External,
  /// Output manager auto-read.
  Internal,
}

/// A resolved read operation, after source arbitration.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
  pub source: ReadSource,
  pub bank_start: u8,
  pub bank_end: u8,
  pub window: AddressWindow,
}

#[derive(Debug, Clone)]
pub struct CommandDispatch {
  opcode: Opcode,
  cmd: ParsedCommand,
}

impl CommandDispatch {
  pub fn new() -> Self {
    Self {
      opcode: Opcode::Nop,
      cmd: ParsedCommand {
        code: 0,
        bank_start: 0,
        bank_end: 0,
        addr_start: 0,
        addr_count: 0,
        magic_error: false,
      },
    }
  }

  pub fn reset(&mut self) {
    self.opcode = Opcode::Nop;
  }

  pub fn opcode(&self) -> Opcode {
    self.opcode
  }

  pub fn command(&self) -> &ParsedCommand {
    &self.cmd
  }

  /// Latch a decoded header. Validation failures leave the instruction
  /// register untouched at Nop.
  pub fn latch(&mut self, cmd: ParsedCommand) -> Result<Opcode> {
    let opcode = Opcode::from_code(cmd.code).ok_or(AxonError::UnknownOpcode(cmd.code))?;
    if self.opcode != Opcode::Nop {
      return Err(AxonError::DispatchBusy(self.opcode.code()));
    }

    match opcode {
      Opcode::WriteWeight | Opcode::WriteIfmap | Opcode::ReadResult => {
        if cmd.bank_start > cmd.bank_end || cmd.bank_end as usize >= NUM_BANKS {
          return Err(AxonError::InvalidBankRange {
            start: cmd.bank_start,
            end: cmd.bank_end,
          });
        }
        let window = AddressWindow::from_count(cmd.addr_start, cmd.addr_count)?;
        if window.addr_end as usize >= BANK_DEPTH {
          return Err(AxonError::WindowOutOfRange {
            start: cmd.addr_start,
            count: cmd.addr_count,
          });
        }
      }
      // StartCompute reuses the fields as layer id / batch count; the
      // layer id is checked against the table by the core.
      Opcode::StartCompute | Opcode::Nop => {}
    }

    self.opcode = opcode;
    self.cmd = cmd;
    debug!("latched {:?}: banks {}..={} window {:#06x}+{}", opcode, cmd.bank_start, cmd.bank_end, cmd.addr_start, cmd.addr_count);
    Ok(opcode)
  }

  /// Completion pulse: clears the instruction register.
  pub fn complete(&mut self) {
    self.opcode = Opcode::Nop;
  }

  /// The window latched with the current command.
  pub fn window(&self) -> Result<AddressWindow> {
    AddressWindow::from_count(self.cmd.addr_start, self.cmd.addr_count)
  }

  /// Arbitrate the read port. The output manager's auto-read overrides
  /// the latched external command for the duration of that operation.
  pub fn read_request(&self, auto: Option<&AutoReadReq>) -> Option<ReadRequest> {
    if let Some(req) = auto {
      return Some(ReadRequest {
        source: ReadSource::Internal,
        bank_start: req.bank_start,
        bank_end: req.bank_end,
        window: req.window,
      });
    }
    if self.opcode == Opcode::ReadResult {
      let window = self.window().ok()?;
      return Some(ReadRequest {
        source: ReadSource::External,
        bank_start: self.cmd.bank_start,
        bank_end: self.cmd.bank_end,
        window,
      });
    }
    None
  }
}

impl Default for CommandDispatch {
  fn default() -> Self {
    Self::new()
  }
}

/// Scatters one frame's payload into a bank range, one word per cycle,
/// bank-inner and address-outer: consecutive words land in consecutive
/// banks at the same address, then the address advances.
#[derive(Debug, Clone)]
pub struct WriteExecutor {
  bank_start: usize,
  bank_end: usize,
  sweep: ParallelSweep,
  bank_cursor: usize,
  done: bool,
}

impl WriteExecutor {
  pub fn new(bank_start: u8, bank_end: u8, window: AddressWindow) -> Self {
    let mask = ParallelSweep::range_mask(bank_start as usize, bank_end as usize);
    Self {
      bank_start: bank_start as usize,
      bank_end: bank_end as usize,
      sweep: ParallelSweep::new(window, mask),
      bank_cursor: bank_start as usize,
      done: false,
    }
  }

  pub fn is_done(&self) -> bool {
    self.done
  }

  /// Accept one payload word. Returns true when the frame is complete.
  pub fn push(&mut self, word: StreamWord, banks: &mut BankArray) -> bool {
    if self.done {
      warn!("payload word after frame end, dropped");
      return true;
    }

    match self.sweep.step(false).addr {
      Some(addr) => {
        banks.write(self.bank_cursor, addr as usize, extend_word(word.data));
      }
      None => warn!("payload word past the address window, dropped"),
    }

    self.bank_cursor += 1;
    if self.bank_cursor > self.bank_end {
      self.bank_cursor = self.bank_start;
      self.sweep.step(true);
    }

    if word.last {
      if !self.sweep.is_finished() || self.bank_cursor != self.bank_start {
        warn!("frame ended before the address window was covered");
      }
      self.done = true;
    }
    self.done
  }
}

/// Per-cycle output of the read executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadExecOutput {
  pub word: Option<StreamWord>,
  /// Pulses on the cycle the final word is emitted.
  pub done: bool,
}

/// Drains a bank range through the accumulation engine's external read
/// bypass, one word per cycle after the initial registered-read bubble.
#[derive(Debug, Clone)]
pub struct ReadExecutor {
  source: ReadSource,
  bank_end: usize,
  window: AddressWindow,
  cur_bank: usize,
  sweep: BankSweep,
  inflight: Option<(usize, bool)>,
}

impl ReadExecutor {
  pub fn new(req: ReadRequest) -> Self {
    Self {
      source: req.source,
      bank_end: req.bank_end as usize,
      window: req.window,
      cur_bank: req.bank_start as usize,
      sweep: BankSweep::new(req.window),
      inflight: None,
    }
  }

  pub fn source(&self) -> ReadSource {
    self.source
  }

  fn issue_next(&mut self) -> Option<(usize, u16, bool)> {
    loop {
      if self.cur_bank > self.bank_end {
        return None;
      }
      match self.sweep.step(true).addr {
        Some(addr) => {
          let is_final = self.cur_bank == self.bank_end && self.sweep.is_finished();
          return Some((self.cur_bank, addr, is_final));
        }
        None => {
          self.cur_bank += 1;
          if self.cur_bank <= self.bank_end {
            self.sweep = BankSweep::new(self.window);
          }
        }
      }
    }
  }

  /// Advance one cycle: emit the word latched last cycle, then issue the
  /// next read.
  pub fn tick(&mut self, accum: &mut AccumEngine, banks: &mut BankArray) -> ReadExecOutput {
    let mut out = ReadExecOutput::default();

    if let Some((bank, is_final)) = self.inflight.take() {
      let data = saturate_word(accum.ext_read_data(bank, banks));
      out.word = Some(if is_final {
        StreamWord::last(data)
      } else {
        StreamWord::new(data)
      });
      if is_final {
        out.done = true;
        return out;
      }
    }

    if let Some((bank, addr, is_final)) = self.issue_next() {
      accum.ext_read_issue(bank, addr as usize, banks);
      self.inflight = Some((bank, is_final));
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cmd(code: u8, bank_start: u8, bank_end: u8, addr_start: u16, addr_count: u16) -> ParsedCommand {
    ParsedCommand {
      code,
      bank_start,
      bank_end,
      addr_start,
      addr_count,
      magic_error: false,
    }
  }

  #[test]
  fn test_latch_validation() {
    let mut d = CommandDispatch::new();
    assert_eq!(d.latch(cmd(0x55, 0, 0, 0, 1)), Err(AxonError::UnknownOpcode(0x55)));
    assert_eq!(
      d.latch(cmd(1, 5, 2, 0, 1)),
      Err(AxonError::InvalidBankRange { start: 5, end: 2 })
    );
    assert!(d.latch(cmd(1, 0, 0, 0x1F0, 0x20)).is_err()); // runs past bank depth
    assert_eq!(d.opcode(), Opcode::Nop);

    assert_eq!(d.latch(cmd(1, 0, 7, 0, 256)), Ok(Opcode::WriteWeight));
    // Busy until completion
    assert_eq!(d.latch(cmd(3, 24, 31, 0, 1)), Err(AxonError::DispatchBusy(1)));
    d.complete();
    assert_eq!(d.opcode(), Opcode::Nop);
    assert_eq!(d.latch(cmd(3, 24, 31, 0, 1)), Ok(Opcode::ReadResult));
  }

  #[test]
  fn test_cleared_command_does_not_retrigger() {
    let mut d = CommandDispatch::new();
    d.latch(cmd(3, 24, 24, 0, 4)).unwrap();
    assert!(d.read_request(None).is_some());
    d.complete();
    assert!(d.read_request(None).is_none());
  }

  #[test]
  fn test_internal_read_wins_arbitration() {
    let mut d = CommandDispatch::new();
    d.latch(cmd(3, 24, 31, 0, 8)).unwrap();

    let auto = AutoReadReq {
      bank_start: 24,
      bank_end: 24,
      window: AddressWindow::new(0, 511).unwrap(),
    };
    let req = d.read_request(Some(&auto)).unwrap();
    assert_eq!(req.source, ReadSource::Internal);
    assert_eq!(req.bank_end, 24);

    let req = d.read_request(None).unwrap();
    assert_eq!(req.source, ReadSource::External);
    assert_eq!(req.bank_end, 31);
  }

  #[test]
  fn test_write_scatter_bank_inner_address_outer() {
    let mut banks = BankArray::new();
    let window = AddressWindow::from_count(0x10, 2).unwrap();
    let mut w = WriteExecutor::new(8, 9, window);

    // 2 addresses x 2 banks: words land (8,0x10) (9,0x10) (8,0x11) (9,0x11)
    assert!(!w.push(StreamWord::new(1), &mut banks));
    assert!(!w.push(StreamWord::new(2), &mut banks));
    assert!(!w.push(StreamWord::new(3), &mut banks));
    assert!(w.push(StreamWord::last(4), &mut banks));

    assert_eq!(banks.peek(8, 0x10), 1);
    assert_eq!(banks.peek(9, 0x10), 2);
    assert_eq!(banks.peek(8, 0x11), 3);
    assert_eq!(banks.peek(9, 0x11), 4);
  }

  #[test]
  fn test_write_sign_extends_payload() {
    let mut banks = BankArray::new();
    let window = AddressWindow::from_count(0, 1).unwrap();
    let mut w = WriteExecutor::new(0, 0, window);
    w.push(StreamWord::last(0xFFFE), &mut banks);
    assert_eq!(banks.peek(0, 0), -2);
  }

  #[test]
  fn test_read_executor_streams_with_latency_one() {
    let mut banks = BankArray::new();
    let mut accum = AccumEngine::new();
    banks.write(24, 0, 10);
    banks.write(24, 1, 70000); // saturates on the way out
    banks.write(25, 0, -5);
    banks.write(25, 1, 6);

    let mut r = ReadExecutor::new(ReadRequest {
      source: ReadSource::External,
      bank_start: 24,
      bank_end: 25,
      window: AddressWindow::new(0, 1).unwrap(),
    });

    // First cycle issues only; words then flow one per cycle
    let out = r.tick(&mut accum, &mut banks);
    assert!(out.word.is_none());

    let mut words = Vec::new();
    let mut done = false;
    for _ in 0..10 {
      let out = r.tick(&mut accum, &mut banks);
      if let Some(w) = out.word {
        words.push(w);
      }
      if out.done {
        done = true;
        break;
      }
    }
    assert!(done);
    assert_eq!(words.len(), 4);
    assert_eq!(words[0].data, 10);
    assert_eq!(words[1].data, 0x7FFF);
    assert_eq!(words[2].data, saturate_word(-5));
    assert_eq!(words[3].data, 6);
    assert!(words[3].last);
    assert!(!words[2].last);
  }
}
