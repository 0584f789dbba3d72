// AXON core parameters (fixed at construction time)

/// Number of lanes (columns) in the systolic compute array.
pub const NUM_PE: usize = 16;
/// Number of independent on-chip memory banks.
pub const NUM_BANKS: usize = 32;
/// Words per bank.
pub const BANK_DEPTH: usize = 512;

/// First bank of the weight region.
pub const WEIGHT_BANK_BASE: usize = 0;
/// First bank of the ifmap region.
pub const IFMAP_BANK_BASE: usize = 8;
/// First bank of the output / partial-sum region.
pub const OUT_BANK_BASE: usize = 24;
/// Banks in the output region.
pub const OUT_BANKS: usize = 8;

/// Magic constant opening every command frame.
pub const CMD_MAGIC: u16 = 0xC0DE;
/// Magic constant opening a full-data result frame.
pub const DATA_MAGIC: u16 = 0xDA7A;
/// Result-header code for a batch-complete notification.
pub const RESULT_NOTIFY_CODE: u16 = 0x0001;
/// Result-header code for a full-data delivery.
pub const RESULT_FULL_CODE: u16 = 0x0002;
/// Words in a command or result header.
pub const HEADER_LEN: usize = 6;

/// Cycles the scheduler holds in WaitMem. The banks present no ready
/// signal; this constant stands in for their read latency.
pub const MEM_READ_WAIT: u32 = 4;

// Type aliases
pub type Word = u16;
pub type PartialSum = i32;
pub type LaneAcc = i64;

/// One word on the framed stream. `last` marks the final payload word of
/// a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamWord {
  pub data: Word,
  pub last: bool,
}

impl StreamWord {
  pub fn new(data: Word) -> Self {
    Self { data, last: false }
  }

  pub fn last(data: Word) -> Self {
    Self { data, last: true }
  }
}

/// Instruction codes carried in header word 1. `Nop` is the cleared value
/// of the dispatch instruction register, never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Nop,
  WriteWeight,
  WriteIfmap,
  ReadResult,
  StartCompute,
}

impl Opcode {
  pub fn from_code(code: u8) -> Option<Self> {
    match code {
      1 => Some(Opcode::WriteWeight),
      2 => Some(Opcode::WriteIfmap),
      3 => Some(Opcode::ReadResult),
      4 => Some(Opcode::StartCompute),
      _ => None,
    }
  }

  pub fn code(self) -> u8 {
    match self {
      Opcode::Nop => 0,
      Opcode::WriteWeight => 1,
      Opcode::WriteIfmap => 2,
      Opcode::ReadResult => 3,
      Opcode::StartCompute => 4,
    }
  }
}

/// Saturate a bank cell to the 16-bit stream word range (Q4.12 words on
/// the wire, full i32 precision inside the banks).
pub fn saturate_word(value: PartialSum) -> Word {
  if value > i16::MAX as PartialSum {
    i16::MAX as Word
  } else if value < i16::MIN as PartialSum {
    i16::MIN as u16
  } else {
    value as i16 as u16
  }
}

/// Sign-extend a 16-bit stream word into a bank cell.
pub fn extend_word(word: Word) -> PartialSum {
  word as i16 as PartialSum
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_opcode_codes() {
    for code in 1..=4u8 {
      let op = Opcode::from_code(code).unwrap();
      assert_eq!(op.code(), code);
    }
    assert!(Opcode::from_code(0).is_none());
    assert!(Opcode::from_code(0x55).is_none());
  }

  #[test]
  fn test_saturation() {
    assert_eq!(saturate_word(100), 100);
    assert_eq!(saturate_word(-1), 0xFFFF);
    assert_eq!(saturate_word(40000), 0x7FFF);
    assert_eq!(saturate_word(-40000), 0x8000);
    assert_eq!(extend_word(0xFFFF), -1);
    assert_eq!(extend_word(0x7FFF), 32767);
  }
}
