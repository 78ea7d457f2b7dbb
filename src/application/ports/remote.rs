//! Remote charging delegate port
//!
//! A delegate is the far side of an operator, pool or station: the backend
//! that actually talks to the hardware (or to another operator's backend).
//! The [`CommandDispatcher`](crate::application::dispatcher::CommandDispatcher)
//! forwards commands to the nearest delegate along the resolved chain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AuthToken, CancelReservationReason, ChargingLocation, ChargingProduct, ChargingSession,
    ChargingSessionId, DispatchResult, EventContext, RemoteError, Reservation, ReservationHandling,
    ReservationId, ReservationLevel,
};

/// Default reservation length when the caller gives none
pub const DEFAULT_RESERVATION_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub location: ChargingLocation,
    pub level: ReservationLevel,
    pub start: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub reservation_id: Option<ReservationId>,
    pub provider_id: Option<String>,
    pub auth_token: Option<AuthToken>,
}

impl ReserveRequest {
    pub fn at(location: ChargingLocation) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReservationRequest {
    pub reservation_id: ReservationId,
    pub reason: CancelReservationReason,
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartRequest {
    pub location: ChargingLocation,
    pub product: Option<ChargingProduct>,
    pub reservation_id: Option<ReservationId>,
    pub session_id: Option<ChargingSessionId>,
    pub provider_id: Option<String>,
    pub auth_token: Option<AuthToken>,
}

impl RemoteStartRequest {
    pub fn at(location: ChargingLocation) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopRequest {
    pub session_id: ChargingSessionId,
    pub reservation_handling: ReservationHandling,
    pub provider_id: Option<String>,
    pub auth_token: Option<AuthToken>,
}

impl RemoteStopRequest {
    pub fn new(session_id: ChargingSessionId) -> Self {
        Self {
            session_id,
            reservation_handling: ReservationHandling::default(),
            provider_id: None,
            auth_token: None,
        }
    }
}

/// Backend that executes charging commands for one operator, pool or station.
///
/// `Err` means the call itself failed (transport, protocol); a delivered but
/// negative answer is an `Ok` result with a non-success status.
#[async_trait]
pub trait RemoteChargingDelegate: Send + Sync {
    async fn reserve(
        &self,
        request: &ReserveRequest,
        ctx: &EventContext,
    ) -> Result<DispatchResult<Reservation>, RemoteError>;

    async fn cancel_reservation(
        &self,
        request: &CancelReservationRequest,
        ctx: &EventContext,
    ) -> Result<DispatchResult<Reservation>, RemoteError>;

    async fn remote_start(
        &self,
        request: &RemoteStartRequest,
        ctx: &EventContext,
    ) -> Result<DispatchResult<ChargingSession>, RemoteError>;

    async fn remote_stop(
        &self,
        request: &RemoteStopRequest,
        ctx: &EventContext,
    ) -> Result<DispatchResult<ChargingSession>, RemoteError>;
}
