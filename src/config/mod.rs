#[cfg(feature = "cli")]
pub mod cli;
pub mod engine_config;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};
pub use engine_config::EngineConfig;
