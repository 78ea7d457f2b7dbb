//! Infrastructure layer - external collaborators

pub mod roaming;

pub use roaming::InMemoryRoamingNetwork;
