use std::io::Write;

/// Initialize the global logger. Safe to call more than once; only the
/// first call takes effect.
pub fn init_log() {
  let env = env_logger::Env::default().default_filter_or("info");
  let _ = env_logger::Builder::from_env(env)
    .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
    .try_init();
}

/// Drop everything below warnings, for quiet mode.
pub fn set_quiet() {
  log::set_max_level(log::LevelFilter::Warn);
}
