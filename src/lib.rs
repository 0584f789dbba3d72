pub mod arch;
pub mod simulator;

pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::utils::log;
