//! Memory bank primitive and the bank array.
//!
//! Each bank is a synchronous store with one write port and one registered
//! read port: a read issued on cycle N delivers its data on cycle N+1
//! through `read_data()`. The bank itself never arbitrates; the single
//! active write driver per bank is an invariant of the surrounding core.

use log::warn;

use super::params::{BANK_DEPTH, NUM_BANKS, PartialSum};

/// One on-chip memory bank.
#[derive(Debug, Clone)]
pub struct MemoryBank {
  cells: Vec<PartialSum>,
  read_reg: PartialSum,
}

impl MemoryBank {
  pub fn new() -> Self {
    Self {
      cells: vec![0; BANK_DEPTH],
      read_reg: 0,
    }
  }

  pub fn reset(&mut self) {
    self.cells.iter_mut().for_each(|c| *c = 0);
    self.read_reg = 0;
  }

  /// Synchronous write, visible to reads issued on later cycles.
  pub fn write(&mut self, addr: usize, data: PartialSum) {
    if addr < BANK_DEPTH {
      self.cells[addr] = data;
    } else {
      warn!("bank write dropped: addr {:#x} out of range", addr);
    }
  }

  /// Issue a read; the value lands in the read register for the next cycle.
  pub fn issue_read(&mut self, addr: usize) {
    if addr < BANK_DEPTH {
      self.read_reg = self.cells[addr];
    } else {
      warn!("bank read of addr {:#x} out of range, returning 0", addr);
      self.read_reg = 0;
    }
  }

  /// Data latched by the previous cycle's `issue_read`.
  pub fn read_data(&self) -> PartialSum {
    self.read_reg
  }

  /// Direct combinational peek, used only for operand prefetch and tests.
  pub fn peek(&self, addr: usize) -> PartialSum {
    if addr < BANK_DEPTH {
      self.cells[addr]
    } else {
      0
    }
  }
}

impl Default for MemoryBank {
  fn default() -> Self {
    Self::new()
  }
}

/// The full set of independent banks.
#[derive(Debug, Clone)]
pub struct BankArray {
  banks: Vec<MemoryBank>,
}

impl BankArray {
  pub fn new() -> Self {
    Self {
      banks: (0..NUM_BANKS).map(|_| MemoryBank::new()).collect(),
    }
  }

  pub fn reset(&mut self) {
    self.banks.iter_mut().for_each(|b| b.reset());
  }

  pub fn write(&mut self, bank: usize, addr: usize, data: PartialSum) {
    if bank < NUM_BANKS {
      self.banks[bank].write(addr, data);
    } else {
      warn!("write to nonexistent bank {}", bank);
    }
  }

  pub fn issue_read(&mut self, bank: usize, addr: usize) {
    if bank < NUM_BANKS {
      self.banks[bank].issue_read(addr);
    } else {
      warn!("read from nonexistent bank {}", bank);
    }
  }

  pub fn read_data(&self, bank: usize) -> PartialSum {
    if bank < NUM_BANKS {
      self.banks[bank].read_data()
    } else {
      0
    }
  }

  pub fn peek(&self, bank: usize, addr: usize) -> PartialSum {
    if bank < NUM_BANKS {
      self.banks[bank].peek(addr)
    } else {
      0
    }
  }
}

impl Default for BankArray {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_registered_read_latency() {
    let mut bank = MemoryBank::new();
    bank.write(0x10, 42);
    bank.write(0x11, 7);

    bank.issue_read(0x10);
    assert_eq!(bank.read_data(), 42);
    // Read register holds until the next issue
    assert_eq!(bank.read_data(), 42);
    bank.issue_read(0x11);
    assert_eq!(bank.read_data(), 7);
  }

  #[test]
  fn test_out_of_range_access_is_harmless() {
    let mut bank = MemoryBank::new();
    bank.write(BANK_DEPTH, 99);
    bank.issue_read(BANK_DEPTH);
    assert_eq!(bank.read_data(), 0);
  }

  #[test]
  fn test_bank_independence() {
    let mut banks = BankArray::new();
    banks.write(3, 0, 100);
    banks.write(4, 0, 200);
    assert_eq!(banks.peek(3, 0), 100);
    assert_eq!(banks.peek(4, 0), 200);
    banks.issue_read(3, 0);
    banks.issue_read(4, 0);
    assert_eq!(banks.read_data(3), 100);
    assert_eq!(banks.read_data(4), 200);
  }
}
