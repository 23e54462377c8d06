pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{InMemoryStore, RegistrySnapshot};
pub use config::EngineConfig;
pub use crate::core::{PortRequest, RegisterService, RegistryEngine};
pub use utils::error::{RegistryError, Result};
