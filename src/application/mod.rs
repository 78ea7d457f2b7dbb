pub mod dispatcher;
pub mod entity;
pub mod events;
pub mod index;
pub mod node;
pub mod operator;
pub mod parking;
pub mod ports;
pub mod registry;
pub mod tracker;
pub mod voting;

// Re-export key types for convenience
pub use dispatcher::{CommandContext, CommandDispatcher};
pub use entity::{HasAdminStatusSchedule, HasStatusSchedule, Identifiable, StatusReport};
pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use index::SecondaryIndex;
pub use node::NodeDraft;
pub use operator::{
    ChargingPool, ChargingStation, ChargingStationGroup, ChargingStationOperator, ChargingTariff,
    ChargingTariffGroup, Evse, EvseGroup, OperatorSettings,
};
pub use parking::{ParkingOperator, ParkingPlace};
pub use ports::{RemoteChargingDelegate, RoamingNetwork};
pub use registry::{AddMode, EntityRegistry, RegistryBuses, RegistryEvent};
pub use tracker::{StatusTracker, TrackedProperty};
pub use voting::{Subscription, VotingBus};
