pub mod allocator;
pub mod engine;
pub mod graph;
pub mod locks;
pub mod scope;
pub mod slug;
pub mod topology;

pub use crate::domain::ports::RegistryStore;
pub use crate::utils::error::Result;
pub use allocator::{PortAllocator, PortRequest};
pub use engine::{DeregisterReport, RegisterService, Registration, RegistryEngine};
pub use graph::DependencyGraph;
pub use topology::DependencyTopology;
