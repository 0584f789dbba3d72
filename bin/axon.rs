use axon::simulator::config::load_and_merge_configs;
use axon::simulator::sim::mode::{SimConfig, StepMode};
use axon::simulator::utils::log::init_log;
use axon::simulator::Simulator;
use clap::Parser;

/// Axon - a 1-D convolution accelerator core simulator
#[derive(Parser, Debug)]
#[command(name = "axon")]
#[command(version = "0.1.0")]
#[command(about = "Cycle-level simulator of the AXON convolution core", long_about = None)]
struct Args {
  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path (JSON lines)
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Custom config file merged over the default
  #[arg(short, long, value_name = "FILE")]
  config: Option<String>,

  /// Layer to run (default: 0)
  #[arg(short, long, value_name = "ID")]
  layer: Option<u8>,

  /// Batches to run (default: the layer's own batch count)
  #[arg(short, long, value_name = "N")]
  batches: Option<u16>,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  let (config, layers) = load_and_merge_configs(
    args.config.as_deref(),
    args.quiet,
    args.step,
    args.trace_file.as_deref(),
    args.layer,
    args.batches,
  )?;

  let step_mode = if config.simulation.step_mode {
    StepMode::Step
  } else {
    StepMode::Continuous
  };

  let sim_config = SimConfig {
    quiet: config.simulation.quiet,
    step_mode,
    trace_file: if config.simulation.trace_file.is_empty() {
      None
    } else {
      Some(config.simulation.trace_file.clone())
    },
    layer: config.simulation.layer,
    batches: config.simulation.batches,
  };

  let mut simulator = Simulator::new(sim_config, layers)?;
  simulator.run()
}
