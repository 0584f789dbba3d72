//! Error types for the AXON core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AxonError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AxonError {
  /// Address window with `start > end` or an empty count.
  #[error("invalid address window: start={start:#06x} count={count}")]
  InvalidWindow { start: u16, count: u16 },

  /// Address window running past the end of a bank.
  #[error("address window exceeds bank depth: start={start:#06x} count={count}")]
  WindowOutOfRange { start: u16, count: u16 },

  /// Bank range with `start > end` or beyond the bank count.
  #[error("invalid bank range: {start}..={end}")]
  InvalidBankRange { start: u8, end: u8 },

  /// Header instruction code that decodes to no operation.
  #[error("unknown instruction code {0:#04x}")]
  UnknownOpcode(u8),

  /// Layer id outside the configured layer table.
  #[error("unknown layer id {0}")]
  UnknownLayer(u8),

  /// A new command latched while the previous one is still executing.
  #[error("command dispatch busy (instruction {0:#04x} still active)")]
  DispatchBusy(u8),

  /// Rejected layer geometry (from the TOML override path).
  #[error("invalid layer geometry for layer {layer}: {reason}")]
  InvalidLayerGeometry { layer: u8, reason: String },
}
