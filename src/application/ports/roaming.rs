//! Roaming network port
//!
//! The roaming network owns reservations and charging sessions and decides
//! on authorization. Operators only keep back-references to what was created
//! through them and fall back to these lookups otherwise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AuthToken, AuthorizationInfo, ChargingLocation, ChargingProduct, ChargingSession,
    ChargingSessionId, EventContext, OperatorId, RemoteError, Reservation, ReservationId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeStartRequest {
    pub operator_id: OperatorId,
    pub auth_token: AuthToken,
    pub location: Option<ChargingLocation>,
    pub product: Option<ChargingProduct>,
    pub session_id: Option<ChargingSessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeStopRequest {
    pub operator_id: OperatorId,
    pub session_id: ChargingSessionId,
    pub auth_token: AuthToken,
    pub location: Option<ChargingLocation>,
}

#[async_trait]
pub trait RoamingNetwork: Send + Sync {
    async fn get_charging_session_by_id(&self, id: &ChargingSessionId) -> Option<ChargingSession>;

    async fn get_reservation(&self, id: &ReservationId) -> Option<Reservation>;

    /// Take ownership of a reservation created through an operator.
    async fn store_reservation(&self, reservation: Reservation);

    /// Take ownership of a session started through an operator.
    async fn store_charging_session(&self, session: ChargingSession);

    async fn authorize_start(
        &self,
        request: &AuthorizeStartRequest,
        ctx: &EventContext,
    ) -> Result<AuthorizationInfo, RemoteError>;

    async fn authorize_stop(
        &self,
        request: &AuthorizeStopRequest,
        ctx: &EventContext,
    ) -> Result<AuthorizationInfo, RemoteError>;
}
