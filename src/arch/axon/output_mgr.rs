//! Output manager.
//!
//! Announces results to the host. A batch-complete pulse opens a
//! notification frame (header plus a one-bank sample slice); the job's
//! final batch instead opens a full-data frame draining the whole output
//! region. The manager emits one header word per cycle, then holds its
//! auto-read request high until the dispatch reports the drain finished.
//! When both trigger pulses land on the same cycle the full-data delivery
//! wins and the notification is suppressed.

use log::{info, warn};

use super::addr_gen::AddressWindow;
use super::params::{
  BANK_DEPTH, CMD_MAGIC, DATA_MAGIC, HEADER_LEN, OUT_BANKS, OUT_BANK_BASE, RESULT_FULL_CODE,
  RESULT_NOTIFY_CODE, StreamWord, Word,
};

/// Result-delivery trigger, latched on the pulse cycle.
#[derive(Debug, Clone, Copy)]
pub struct OutputTrigger {
  pub batch_id: u16,
  pub layer_id: u8,
  pub tile_start: u16,
  pub tile_end: u16,
  /// Final batch of the job: deliver full data instead of a notification.
  pub all_done: bool,
}

/// Read operation requested from the dispatch read mux.
#[derive(Debug, Clone, Copy)]
pub struct AutoReadReq {
  pub bank_start: u8,
  pub bank_end: u8,
  pub window: AddressWindow,
}

/// One-cycle outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMgrOutput {
  pub header_word: Option<StreamWord>,
  /// Held (not pulsed) while a drain is wanted.
  pub auto_read: Option<AutoReadReq>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryKind {
  Notification,
  FullData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MgrState {
  Idle,
  SendHeader(u8),
  WaitDone,
}

#[derive(Debug, Clone)]
pub struct OutputManager {
  state: MgrState,
  kind: DeliveryKind,
  header: [Word; HEADER_LEN],
  read_req: AutoReadReq,
}

impl OutputManager {
  pub fn new() -> Self {
    Self {
      state: MgrState::Idle,
      kind: DeliveryKind::Notification,
      header: [0; HEADER_LEN],
      read_req: AutoReadReq {
        bank_start: OUT_BANK_BASE as u8,
        bank_end: OUT_BANK_BASE as u8,
        window: AddressWindow {
          addr_start: 0,
          addr_end: (BANK_DEPTH - 1) as u16,
        },
      },
    }
  }

  pub fn reset(&mut self) {
    self.state = MgrState::Idle;
  }

  pub fn is_idle(&self) -> bool {
    self.state == MgrState::Idle
  }

  fn latch(&mut self, t: OutputTrigger) {
    let full_window = AddressWindow {
      addr_start: 0,
      addr_end: (BANK_DEPTH - 1) as u16,
    };
    if t.all_done {
      self.kind = DeliveryKind::FullData;
      let word_count = (OUT_BANKS * BANK_DEPTH) as Word;
      self.header = [DATA_MAGIC, RESULT_FULL_CODE, t.layer_id as Word, 0, 0, word_count];
      self.read_req = AutoReadReq {
        bank_start: OUT_BANK_BASE as u8,
        bank_end: (OUT_BANK_BASE + OUT_BANKS - 1) as u8,
        window: full_window,
      };
      info!("output: full-data delivery for layer {}", t.layer_id);
    } else {
      self.kind = DeliveryKind::Notification;
      self.header = [
        CMD_MAGIC,
        RESULT_NOTIFY_CODE,
        t.batch_id,
        t.tile_start,
        t.tile_end,
        BANK_DEPTH as Word,
      ];
      // Sample slice: the first output bank only
      self.read_req = AutoReadReq {
        bank_start: OUT_BANK_BASE as u8,
        bank_end: OUT_BANK_BASE as u8,
        window: full_window,
      };
      info!("output: batch {} notification", t.batch_id);
    }
    self.state = MgrState::SendHeader(0);
  }

  /// Advance one cycle.
  pub fn tick(&mut self, trigger: Option<OutputTrigger>, read_done: bool) -> OutputMgrOutput {
    let mut out = OutputMgrOutput::default();

    if let Some(t) = trigger {
      if self.state == MgrState::Idle {
        self.latch(t);
        // Header starts flowing this same cycle
      } else {
        warn!("result trigger while a delivery is in flight, dropped");
      }
    }

    match self.state {
      MgrState::Idle => {}
      MgrState::SendHeader(idx) => {
        out.header_word = Some(StreamWord::new(self.header[idx as usize]));
        self.state = if idx as usize == HEADER_LEN - 1 {
          MgrState::WaitDone
        } else {
          MgrState::SendHeader(idx + 1)
        };
      }
      MgrState::WaitDone => {
        if read_done {
          // Drop the request the same cycle so the mux cannot re-arm
          self.state = MgrState::Idle;
        } else {
          out.auto_read = Some(self.read_req);
        }
      }
    }

    out
  }
}

impl Default for OutputManager {
  fn default() -> Self {
    Self::new()
  }
}
