//! Output-channel mapper.
//!
//! Once per pass the scheduler asks for a snapshot mapping each lane to
//! its destination partial-sum location. The snapshot is a pure function
//! of `(row_id, tile_id, layer)` and stays frozen until the next pass's
//! trigger; lanes whose output channel does not exist for the layer get
//! an invalid entry, which the accumulation engine discards silently.

use serde::Serialize;

use super::layer::{ConvMode, LayerConfig};
use super::params::{BANK_DEPTH, NUM_PE, OUT_BANKS, OUT_BANK_BASE};

/// Destination of one lane's ejected result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapEntry {
  pub valid: bool,
  pub bank: u8,
  pub addr: u16,
}

impl MapEntry {
  pub const INVALID: MapEntry = MapEntry {
    valid: false,
    bank: 0,
    addr: 0,
  };
}

/// Per-pass lane-to-destination map, one entry per lane.
pub type ChannelMapSnapshot = [MapEntry; NUM_PE];

/// Compute the snapshot for one pass.
///
/// Lane `c` carries output channel `tile_id * NUM_PE + c`. The channel
/// selects the destination bank round-robin across the output region and
/// the row selects the address inside it; transposed layers scatter rows
/// by the layer stride.
pub fn compute_snapshot(layer: &LayerConfig, row_id: u16, tile_id: u16) -> ChannelMapSnapshot {
  let mut snapshot = [MapEntry::INVALID; NUM_PE];

  for (lane, entry) in snapshot.iter_mut().enumerate() {
    let ch = tile_id as usize * NUM_PE + lane;
    if ch >= layer.output_channels as usize {
      continue; // no destination for this tap
    }

    let bank = OUT_BANK_BASE + ch % OUT_BANKS;
    let group = (ch / OUT_BANKS) as u32;
    let addr = match layer.conv_mode {
      ConvMode::Normal => group * layer.rows_per_tile as u32 + row_id as u32,
      ConvMode::Transposed => {
        let stride = layer.stride as u32;
        group * layer.rows_per_tile as u32 * stride + row_id as u32 * stride
      }
    };
    if addr as usize >= BANK_DEPTH {
      continue;
    }

    *entry = MapEntry {
      valid: true,
      bank: bank as u8,
      addr: addr as u16,
    };
  }

  snapshot
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::layer::LayerTable;

  #[test]
  fn test_layer0_tile0_maps_all_lanes() {
    let table = LayerTable::new();
    let layer = table.get(0).unwrap();
    let snap = compute_snapshot(layer, 5, 0);

    for (lane, entry) in snap.iter().enumerate() {
      assert!(entry.valid, "lane {} should be valid", lane);
      assert_eq!(entry.bank as usize, OUT_BANK_BASE + lane % OUT_BANKS);
      // Channels 0..7 land at row 5, channels 8..15 one tile-row further
      let expected = (lane / OUT_BANKS) as u16 * layer.rows_per_tile + 5;
      assert_eq!(entry.addr, expected);
    }
  }

  #[test]
  fn test_channels_past_output_count_are_invalid() {
    let table = LayerTable::new();
    // Layer 2 has 16 output channels: tile 1 covers channels 16..31
    let layer = table.get(2).unwrap();
    let snap = compute_snapshot(layer, 0, 1);
    assert!(snap.iter().all(|e| !e.valid));

    let snap = compute_snapshot(layer, 0, 0);
    assert!(snap.iter().all(|e| e.valid));
  }

  #[test]
  fn test_transposed_mode_scatters_by_stride() {
    let table = LayerTable::new();
    let layer = table.get(3).unwrap();
    assert_eq!(layer.stride, 2);

    let snap = compute_snapshot(layer, 7, 0);
    assert!(snap[0].valid);
    assert_eq!(snap[0].addr, 14);
    // Lane 8 is channel group 1: offset by a full strided tile-row block
    assert!(snap.iter().skip(layer.output_channels as usize).all(|e| !e.valid));
  }

  #[test]
  fn test_snapshot_is_deterministic() {
    let table = LayerTable::new();
    let layer = table.get(1).unwrap();
    let a = compute_snapshot(layer, 63, 1);
    let b = compute_snapshot(layer, 63, 1);
    assert_eq!(a, b);
  }
}
