//! Outward notifications (status changes, command request/response logging)

pub mod event_bus;
pub mod types;

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};
pub use types::{
    CommandKind, CommandRequestEvent, CommandResponseEvent, DataChangedEvent, EntityKind,
    EntityRef, Event, EventMessage, ReservationEvent, SessionEvent, StatusChangedEvent,
};
