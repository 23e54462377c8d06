// Adapters layer: concrete store implementations behind the RegistryStore port.

pub mod memory;
pub mod snapshot;

pub use memory::InMemoryStore;
pub use snapshot::RegistrySnapshot;
