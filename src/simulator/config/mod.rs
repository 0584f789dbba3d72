pub mod config;

pub use config::{AppConfig, load_and_merge_configs};
