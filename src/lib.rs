//! # Texnouz CPO
//!
//! Charging station operator core: a multi-tenant hierarchy of operators,
//! charging pools, charging stations and EVSEs with tariffs and groups,
//! plus remote command dispatch (reserve, authorize, start/stop).
//!
//! ## Architecture
//!
//! - **domain**: Identifiers, status values, schedules, charging value types and results
//! - **application**: Voting buses, entity registries, indexes, aggregates and the command dispatcher
//! - **infrastructure**: In-memory roaming network
//! - **config**: TOML application configuration

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{default_config_path, AppConfig};

pub use application::{
    create_event_bus, ChargingStationOperator, Event, EventBus, NodeDraft, OperatorSettings,
    ParkingOperator, SharedEventBus,
};

pub use infrastructure::InMemoryRoamingNetwork;
