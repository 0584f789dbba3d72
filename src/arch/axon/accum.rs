//! Accumulation engine.
//!
//! Catches lane ejections and folds them into the output banks with a
//! read-modify-write. The bank read port is registered, so each RMW is a
//! two-cycle affair held in a one-deep pending slot: the read issues the
//! cycle the ejection lands, the add and write-back happen the next. Lane
//! ejections arrive on consecutive cycles, which keeps the slot exactly
//! full during a drain. The engine also fronts the output banks' read
//! port for external drains; the two users are mutually exclusive by
//! construction and concurrent use is logged and counted, never
//! arbitrated.

use log::{debug, warn};

use super::bank::BankArray;
use super::mapper::{ChannelMapSnapshot, MapEntry};
use super::params::{LaneAcc, NUM_PE, PartialSum};

#[derive(Debug, Clone, Copy)]
struct PendingRmw {
  bank: usize,
  addr: usize,
  add: PartialSum,
}

#[derive(Debug, Clone)]
pub struct AccumEngine {
  snapshot: ChannelMapSnapshot,
  pending: Option<PendingRmw>,
  port_conflicts: u32,
}

impl AccumEngine {
  pub fn new() -> Self {
    Self {
      snapshot: [MapEntry::INVALID; NUM_PE],
      pending: None,
      port_conflicts: 0,
    }
  }

  pub fn reset(&mut self) {
    self.snapshot = [MapEntry::INVALID; NUM_PE];
    self.pending = None;
    self.port_conflicts = 0;
  }

  /// Install the lane-to-destination map for the pass about to drain.
  pub fn load_snapshot(&mut self, snapshot: ChannelMapSnapshot) {
    self.snapshot = snapshot;
  }

  pub fn has_pending(&self) -> bool {
    self.pending.is_some()
  }

  /// Advance one cycle: retire last cycle's pending RMW, then stage this
  /// cycle's ejection (if any) against the snapshot.
  pub fn tick(&mut self, eject: Option<(usize, LaneAcc)>, banks: &mut BankArray) {
    if let Some(p) = self.pending.take() {
      let old = banks.read_data(p.bank);
      banks.write(p.bank, p.addr, old.wrapping_add(p.add));
    }

    if let Some((lane, value)) = eject {
      let entry = self.snapshot[lane];
      if !entry.valid {
        debug!("lane {} ejection discarded: no destination", lane);
        return;
      }
      let add = value.clamp(PartialSum::MIN as LaneAcc, PartialSum::MAX as LaneAcc) as PartialSum;
      banks.issue_read(entry.bank as usize, entry.addr as usize);
      self.pending = Some(PendingRmw {
        bank: entry.bank as usize,
        addr: entry.addr as usize,
        add,
      });
    }
  }

  /// External drain: issue a read on the shared port. Data lands next
  /// cycle via `ext_read_data`.
  pub fn ext_read_issue(&mut self, bank: usize, addr: usize, banks: &mut BankArray) {
    if self.pending.is_some() {
      warn!("external read of bank {} while an accumulation is in flight", bank);
      self.port_conflicts += 1;
    }
    banks.issue_read(bank, addr);
  }

  pub fn ext_read_data(&self, bank: usize, banks: &BankArray) -> PartialSum {
    banks.read_data(bank)
  }

  /// External reads issued while an accumulation was in flight. The read
  /// port is never arbitrated, so a nonzero count means a caller broke
  /// the mutual-exclusion rule and the overlapped RMW read stale data.
  pub fn port_conflicts(&self) -> u32 {
    self.port_conflicts
  }
}

impl Default for AccumEngine {
  fn default() -> Self {
    Self::new()
  }
}
