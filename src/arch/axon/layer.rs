//! Per-layer configuration table.
//!
//! Every piece of layer-dependent geometry lives here as explicit table
//! fields selected by layer id: the pass decomposition (rows per tile,
//! tiles per batch), the pipeline contraction length, and the partition of
//! the weight/ifmap regions into address windows. Nothing downstream
//! decodes layer geometry from bit slices.

use serde::{Deserialize, Serialize};

use super::error::{AxonError, Result};
use super::params::{BANK_DEPTH, IFMAP_BANK_BASE, OUT_BANK_BASE, WEIGHT_BANK_BASE};

/// Convolution flavor of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvMode {
  Normal,
  Transposed,
}

/// Static per-layer parameters. Immutable for the duration of a layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
  pub layer_id: u8,
  pub conv_mode: ConvMode,
  pub stride: u8,
  pub padding: u8,
  pub kernel_size: u8,
  pub input_channels: u16,
  pub output_channels: u16,
  pub temporal_length: u16,

  // Pass decomposition
  pub rows_per_tile: u16,
  pub tiles_per_batch: u16,
  pub num_batches: u16,

  // Pipeline contraction length, latched at pass start
  pub num_iterations: u16,

  // Address-window partition of the ifmap and weight regions
  pub ifmap_windows: u8,
  pub ifmap_window_len: u16,
  pub weight_windows: u8,
  pub weight_window_len: u16,
}

impl LayerConfig {
  /// Passes in one batch of this layer.
  pub fn max_passes(&self) -> u32 {
    self.rows_per_tile as u32 * self.tiles_per_batch as u32
  }

  /// Check the geometry against the fixed bank map.
  pub fn validate(&self) -> Result<()> {
    let fail = |reason: &str| {
      Err(AxonError::InvalidLayerGeometry {
        layer: self.layer_id,
        reason: reason.to_string(),
      })
    };

    if self.rows_per_tile == 0 || self.tiles_per_batch == 0 || self.num_batches == 0 {
      return fail("zero-sized decomposition");
    }
    if self.rows_per_tile as u32 * self.tiles_per_batch as u32 > 65536 {
      return fail("pass decomposition exceeds 65536 passes per batch");
    }
    if self.num_iterations == 0 {
      return fail("num_iterations must be at least 1");
    }
    if self.ifmap_windows == 0 || self.weight_windows == 0 {
      return fail("window count must be at least 1");
    }
    if self.ifmap_window_len as usize > BANK_DEPTH || self.weight_window_len as usize > BANK_DEPTH {
      return fail("window longer than a bank");
    }
    if self.ifmap_window_len == 0 || self.weight_window_len == 0 {
      return fail("zero-length window");
    }
    if IFMAP_BANK_BASE + self.ifmap_windows as usize > OUT_BANK_BASE {
      return fail("ifmap windows overrun the ifmap bank region");
    }
    if WEIGHT_BANK_BASE + self.weight_windows as usize > IFMAP_BANK_BASE {
      return fail("weight windows overrun the weight bank region");
    }
    Ok(())
  }
}

/// Fixed layer table. Layers 0-3 implement the four generator stages:
/// one ordinary convolution followed by three stride-2 transposed
/// convolutions doubling the temporal length each stage.
pub fn default_layer_table() -> Vec<LayerConfig> {
  vec![
    LayerConfig {
      layer_id: 0,
      conv_mode: ConvMode::Normal,
      stride: 1,
      padding: 1,
      kernel_size: 3,
      input_channels: 64,
      output_channels: 64,
      temporal_length: 128,
      rows_per_tile: 32,
      tiles_per_batch: 4,
      num_batches: 1,
      num_iterations: 65,
      ifmap_windows: 2,
      ifmap_window_len: 256,
      weight_windows: 4,
      weight_window_len: 256,
    },
    LayerConfig {
      layer_id: 1,
      conv_mode: ConvMode::Transposed,
      stride: 2,
      padding: 1,
      kernel_size: 4,
      input_channels: 64,
      output_channels: 32,
      temporal_length: 256,
      rows_per_tile: 64,
      tiles_per_batch: 4,
      num_batches: 1,
      num_iterations: 127,
      ifmap_windows: 4,
      ifmap_window_len: 256,
      weight_windows: 4,
      weight_window_len: 256,
    },
    LayerConfig {
      layer_id: 2,
      conv_mode: ConvMode::Transposed,
      stride: 2,
      padding: 1,
      kernel_size: 4,
      input_channels: 32,
      output_channels: 16,
      temporal_length: 512,
      rows_per_tile: 128,
      tiles_per_batch: 8,
      num_batches: 1,
      num_iterations: 257,
      ifmap_windows: 8,
      ifmap_window_len: 128,
      weight_windows: 8,
      weight_window_len: 128,
    },
    LayerConfig {
      layer_id: 3,
      conv_mode: ConvMode::Transposed,
      stride: 2,
      padding: 1,
      kernel_size: 4,
      input_channels: 16,
      output_channels: 8,
      temporal_length: 1024,
      rows_per_tile: 256,
      tiles_per_batch: 4,
      num_batches: 1,
      num_iterations: 257,
      ifmap_windows: 16,
      ifmap_window_len: 64,
      weight_windows: 4,
      weight_window_len: 64,
    },
  ]
}

/// Layer table with lookup by id.
#[derive(Debug, Clone)]
pub struct LayerTable {
  layers: Vec<LayerConfig>,
}

impl LayerTable {
  pub fn new() -> Self {
    Self {
      layers: default_layer_table(),
    }
  }

  /// Replace a table entry with a host-provided configuration.
  pub fn override_layer(&mut self, config: LayerConfig) -> Result<()> {
    config.validate()?;
    match self.layers.iter_mut().find(|l| l.layer_id == config.layer_id) {
      Some(slot) => {
        *slot = config;
        Ok(())
      }
      None => Err(AxonError::UnknownLayer(config.layer_id)),
    }
  }

  pub fn get(&self, layer_id: u8) -> Result<&LayerConfig> {
    self
      .layers
      .iter()
      .find(|l| l.layer_id == layer_id)
      .ok_or(AxonError::UnknownLayer(layer_id))
  }
}

impl Default for LayerTable {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_table_is_valid() {
    for layer in default_layer_table() {
      layer.validate().unwrap();
    }
  }

  #[test]
  fn test_pass_counts_match_decomposition() {
    let table = LayerTable::new();
    // 32*4, 64*4, 128*8, 256*4 passes per batch
    assert_eq!(table.get(0).unwrap().max_passes(), 128);
    assert_eq!(table.get(1).unwrap().max_passes(), 256);
    assert_eq!(table.get(2).unwrap().max_passes(), 1024);
    assert_eq!(table.get(3).unwrap().max_passes(), 1024);
  }

  #[test]
  fn test_unknown_layer_rejected() {
    let table = LayerTable::new();
    assert_eq!(table.get(7).unwrap_err(), AxonError::UnknownLayer(7));
  }

  #[test]
  fn test_override_rejects_bad_geometry() {
    let mut table = LayerTable::new();
    let mut bad = table.get(0).unwrap().clone();
    bad.ifmap_window_len = 1024; // longer than a bank
    assert!(table.override_layer(bad).is_err());

    let mut good = table.get(0).unwrap().clone();
    good.num_batches = 2;
    table.override_layer(good).unwrap();
    assert_eq!(table.get(0).unwrap().num_batches, 2);
  }

  #[test]
  fn test_override_rejects_oversized_decomposition() {
    let mut table = LayerTable::new();
    let mut bad = table.get(0).unwrap().clone();
    bad.rows_per_tile = 2;
    bad.tiles_per_batch = 65535;
    assert!(table.override_layer(bad).is_err());

    // Exactly the bound is accepted
    let mut edge = table.get(0).unwrap().clone();
    edge.rows_per_tile = 256;
    edge.tiles_per_batch = 256;
    table.override_layer(edge).unwrap();
  }
}
