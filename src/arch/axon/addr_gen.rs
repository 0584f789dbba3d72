//! Address counters.
//!
//! Two sweep variants drive the bank address ports: a single-bank sweep
//! for sequential drains and an all-bank parallel sweep for bulk
//! weight/ifmap loads. Windows are inclusive on both ends; a window with
//! `start > end` is rejected at construction, never swept. Reaching the
//! end address is terminal for the sweep instance.

use super::error::{AxonError, Result};
use super::params::NUM_BANKS;

/// Inclusive address window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
  pub addr_start: u16,
  pub addr_end: u16,
}

impl AddressWindow {
  pub fn new(addr_start: u16, addr_end: u16) -> Result<Self> {
    if addr_start > addr_end {
      return Err(AxonError::InvalidWindow {
        start: addr_start,
        count: 0,
      });
    }
    Ok(Self { addr_start, addr_end })
  }

  /// Window from a start address and a word count (count >= 1).
  pub fn from_count(addr_start: u16, count: u16) -> Result<Self> {
    if count == 0 {
      return Err(AxonError::InvalidWindow {
        start: addr_start,
        count,
      });
    }
    let addr_end = addr_start
      .checked_add(count - 1)
      .ok_or(AxonError::WindowOutOfRange {
        start: addr_start,
        count,
      })?;
    Ok(Self { addr_start, addr_end })
  }

  pub fn len(&self) -> usize {
    (self.addr_end - self.addr_start) as usize + 1
  }
}

/// Output of one sweep step.
#[derive(Debug, Clone, Copy)]
pub struct SweepOut {
  /// Address driven this cycle, None once the sweep has finished.
  pub addr: Option<u16>,
  /// One-cycle completion pulse, raised on the step after the last address.
  pub done: bool,
}

/// Sequential address sweep over one bank.
#[derive(Debug, Clone)]
pub struct BankSweep {
  window: AddressWindow,
  next: u32,
  done_seen: bool,
}

impl BankSweep {
  pub fn new(window: AddressWindow) -> Self {
    Self {
      window,
      next: window.addr_start as u32,
      done_seen: false,
    }
  }

  /// Advance one cycle. With `enable` low the counter holds.
  pub fn step(&mut self, enable: bool) -> SweepOut {
    if self.next > self.window.addr_end as u32 {
      // Terminal: `done` pulses exactly once
      let done = !self.done_seen;
      self.done_seen = true;
      return SweepOut { addr: None, done };
    }
    if !enable {
      return SweepOut {
        addr: Some(self.next as u16),
        done: false,
      };
    }
    let addr = self.next as u16;
    self.next += 1;
    SweepOut {
      addr: Some(addr),
      done: false,
    }
  }

  pub fn is_finished(&self) -> bool {
    self.next > self.window.addr_end as u32
  }
}

/// Lock-step sweep broadcasting one address to all banks, with a per-bank
/// enable mask. Used when every bank in a region is scanned together.
#[derive(Debug, Clone)]
pub struct ParallelSweep {
  sweep: BankSweep,
  pub bank_enable: [bool; NUM_BANKS],
}

impl ParallelSweep {
  pub fn new(window: AddressWindow, bank_enable: [bool; NUM_BANKS]) -> Self {
    Self {
      sweep: BankSweep::new(window),
      bank_enable,
    }
  }

  /// Enable mask covering an inclusive bank range.
  pub fn range_mask(bank_start: usize, bank_end: usize) -> [bool; NUM_BANKS] {
    let mut mask = [false; NUM_BANKS];
    for bank in bank_start..=bank_end.min(NUM_BANKS - 1) {
      mask[bank] = true;
    }
    mask
  }

  pub fn step(&mut self, enable: bool) -> SweepOut {
    self.sweep.step(enable)
  }

  pub fn is_finished(&self) -> bool {
    self.sweep.is_finished()
  }
}
