//! Outward events
//!
//! Everything an external serializer or logger can subscribe to.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    ChargingLocation, ChargingSession, DispatchStatus, EventTrackingId, Reservation, UserId,
};

/// Kind of entity an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Operator,
    ChargingPool,
    ChargingStation,
    Evse,
    ChargingTariff,
    ChargingTariffGroup,
    ChargingStationGroup,
    EvseGroup,
    ParkingOperator,
    ParkingPlace,
}

impl EntityKind {
    /// Human-readable name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Operator => "charging station operator",
            Self::ChargingPool => "charging pool",
            Self::ChargingStation => "charging station",
            Self::Evse => "EVSE",
            Self::ChargingTariff => "charging tariff",
            Self::ChargingTariffGroup => "charging tariff group",
            Self::ChargingStationGroup => "charging station group",
            Self::EvseGroup => "EVSE group",
            Self::ParkingOperator => "parking operator",
            Self::ParkingPlace => "parking place",
        }
    }
}

/// Serializable reference to one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// Remote commands the dispatcher handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Reserve,
    CancelReservation,
    AuthorizeStart,
    AuthorizeStop,
    RemoteStart,
    RemoteStop,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::CancelReservation => "cancel_reservation",
            Self::AuthorizeStart => "authorize_start",
            Self::AuthorizeStop => "authorize_stop",
            Self::RemoteStart => "remote_start",
            Self::RemoteStop => "remote_stop",
        }
    }

    fn request_type(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve_request",
            Self::CancelReservation => "cancel_reservation_request",
            Self::AuthorizeStart => "authorize_start_request",
            Self::AuthorizeStop => "authorize_stop_request",
            Self::RemoteStart => "remote_start_request",
            Self::RemoteStop => "remote_stop_request",
        }
    }

    fn response_type(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve_response",
            Self::CancelReservation => "cancel_reservation_response",
            Self::AuthorizeStart => "authorize_start_response",
            Self::AuthorizeStop => "authorize_stop_response",
            Self::RemoteStart => "remote_start_response",
            Self::RemoteStop => "remote_stop_response",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event types for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    DataChanged(DataChangedEvent),
    AdminStatusChanged(StatusChangedEvent),
    StatusChanged(StatusChangedEvent),
    CommandRequest(CommandRequestEvent),
    CommandResponse(CommandResponseEvent),
    NewReservation(ReservationEvent),
    ReservationCanceled(ReservationEvent),
    NewChargingSession(SessionEvent),
    ChargingSessionStopped(SessionEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::DataChanged(_) => "data_changed",
            Event::AdminStatusChanged(_) => "admin_status_changed",
            Event::StatusChanged(_) => "status_changed",
            Event::CommandRequest(e) => e.command.request_type(),
            Event::CommandResponse(e) => e.command.response_type(),
            Event::NewReservation(_) => "new_reservation",
            Event::ReservationCanceled(_) => "reservation_canceled",
            Event::NewChargingSession(_) => "new_charging_session",
            Event::ChargingSessionStopped(_) => "charging_session_stopped",
        }
    }

    /// Id of the entity, operator, reservation or session the event is about
    pub fn subject_id(&self) -> &str {
        match self {
            Event::DataChanged(e) => &e.entity.id,
            Event::AdminStatusChanged(e) | Event::StatusChanged(e) => &e.entity.id,
            Event::CommandRequest(e) => &e.operator_id,
            Event::CommandResponse(e) => &e.operator_id,
            Event::NewReservation(e) | Event::ReservationCanceled(e) => e.reservation.id.as_str(),
            Event::NewChargingSession(e) | Event::ChargingSessionStopped(e) => {
                e.session.id.as_str()
            }
        }
    }

    pub fn event_tracking_id(&self) -> &EventTrackingId {
        match self {
            Event::DataChanged(e) => &e.event_tracking_id,
            Event::AdminStatusChanged(e) | Event::StatusChanged(e) => &e.event_tracking_id,
            Event::CommandRequest(e) => &e.event_tracking_id,
            Event::CommandResponse(e) => &e.event_tracking_id,
            Event::NewReservation(e) | Event::ReservationCanceled(e) => &e.event_tracking_id,
            Event::NewChargingSession(e) | Event::ChargingSessionStopped(e) => {
                &e.event_tracking_id
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataChangedEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub user_id: Option<UserId>,
    pub entity: EntityRef,
    pub property_name: String,
    pub new_value: Value,
    pub old_value: Option<Value>,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub new_value: String,
    pub old_value: Option<String>,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequestEvent {
    pub command: CommandKind,
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub operator_id: String,
    pub location: Option<ChargingLocation>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponseEvent {
    pub command: CommandKind,
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub operator_id: String,
    pub location: Option<ChargingLocation>,
    pub parameters: Value,
    pub status: DispatchStatus,
    pub description: Option<String>,
    pub runtime: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub session: ChargingSession,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
