//! Roaming network implementations

mod memory;

pub use memory::InMemoryRoamingNetwork;
