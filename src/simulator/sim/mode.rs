#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
  pub quiet: bool,
  pub step_mode: StepMode,
  pub trace_file: Option<String>,
  /// Layer the workload driver runs.
  pub layer: u8,
  /// Batches for the compute launch; 0 uses the layer default.
  pub batches: u16,
}

impl Default for SimConfig {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: StepMode::Continuous,
      trace_file: None,
      layer: 0,
      batches: 0,
    }
  }
}
