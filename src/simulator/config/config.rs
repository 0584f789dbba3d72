use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::arch::axon::layer::{LayerConfig, LayerTable};

/// Simulation section of the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default)]
  pub layer: u8,
  /// Batches for the compute launch; 0 uses the layer default.
  #[serde(default)]
  pub batches: u16,
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      layer: 0,
      batches: 0,
    }
  }
}

/// Unified application config: the simulation knobs plus optional
/// replacements for entries of the built-in layer table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub simulation: SimulationSection,
  #[serde(default)]
  pub layers: Vec<LayerConfig>,
}

/// Load the default config shipped next to this module.
pub fn load_default_config() -> io::Result<AppConfig> {
  let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
  let config_path = manifest_dir
    .join("src")
    .join("simulator")
    .join("config")
    .join("default.toml");

  load_config_file(&config_path)
}

/// Load a config from a specific file.
pub fn load_config_file(path: &Path) -> io::Result<AppConfig> {
  let content = fs::read_to_string(path)
    .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("cannot read config file {:?}: {}", path, e)))?;

  toml::from_str::<AppConfig>(&content)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("TOML parse error: {}", e)))
}

/// Merge two configs (the override wins field by field).
pub fn merge_config(mut base: AppConfig, override_config: AppConfig) -> AppConfig {
  if override_config.simulation.quiet {
    base.simulation.quiet = true;
  }
  if override_config.simulation.step_mode {
    base.simulation.step_mode = true;
  }
  if !override_config.simulation.trace_file.is_empty() {
    base.simulation.trace_file = override_config.simulation.trace_file;
  }
  if override_config.simulation.layer != 0 {
    base.simulation.layer = override_config.simulation.layer;
  }
  if override_config.simulation.batches != 0 {
    base.simulation.batches = override_config.simulation.batches;
  }

  // Layer overrides replace by id; later entries win
  for layer in override_config.layers {
    match base.layers.iter_mut().find(|l| l.layer_id == layer.layer_id) {
      Some(slot) => *slot = layer,
      None => base.layers.push(layer),
    }
  }

  base
}

/// Apply CLI arguments on top of the loaded config.
pub fn apply_cli_overrides(
  config: &mut AppConfig,
  quiet: bool,
  step: bool,
  trace_file: Option<&str>,
  layer: Option<u8>,
  batches: Option<u16>,
) {
  if quiet {
    config.simulation.quiet = true;
  }
  if step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = trace_file {
    config.simulation.trace_file = file.to_string();
  }
  if let Some(layer) = layer {
    config.simulation.layer = layer;
  }
  if let Some(batches) = batches {
    config.simulation.batches = batches;
  }
}

/// Validate the config and build the layer table it describes.
pub fn validate_config(config: &AppConfig) -> io::Result<LayerTable> {
  let mut table = LayerTable::new();
  for layer in &config.layers {
    table
      .override_layer(layer.clone())
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
  }
  if table.get(config.simulation.layer).is_err() {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      format!("layer {} is not in the layer table", config.simulation.layer),
    ));
  }
  Ok(table)
}

/// Load and merge all config sources.
///
/// Order: default file, then the user file (if given), then CLI
/// overrides, then validation.
pub fn load_and_merge_configs(
  custom_config_path: Option<&str>,
  quiet: bool,
  step: bool,
  trace_file: Option<&str>,
  layer: Option<u8>,
  batches: Option<u16>,
) -> io::Result<(AppConfig, LayerTable)> {
  let mut config = load_default_config()?;

  if let Some(custom_path) = custom_config_path {
    let custom_config = load_config_file(Path::new(custom_path))?;
    config = merge_config(config, custom_config);
  }

  apply_cli_overrides(&mut config, quiet, step, trace_file, layer, batches);

  let table = validate_config(&config)?;
  Ok((config, table))
}
