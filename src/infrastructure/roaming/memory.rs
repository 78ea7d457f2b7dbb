//! In-memory roaming network for development and testing

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::application::ports::{AuthorizeStartRequest, AuthorizeStopRequest, RoamingNetwork};
use crate::domain::{
    AuthToken, AuthorizationInfo, AuthorizationStatus, ChargingSession, ChargingSessionId,
    EventContext, RemoteError, Reservation, ReservationId,
};

/// Reservation store, session store and token allow-list kept in memory
pub struct InMemoryRoamingNetwork {
    name: String,
    reservations: DashMap<ReservationId, Reservation>,
    sessions: DashMap<ChargingSessionId, ChargingSession>,
    tokens: DashMap<AuthToken, AuthorizationStatus>,
}

impl InMemoryRoamingNetwork {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reservations: DashMap::new(),
            sessions: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allow_token(&self, token: AuthToken) {
        self.tokens.insert(token, AuthorizationStatus::Authorized);
    }

    pub fn block_token(&self, token: AuthToken) {
        self.tokens.insert(token, AuthorizationStatus::Blocked);
    }

    pub fn revoke_token(&self, token: &AuthToken) {
        self.tokens.remove(token);
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn token_status(&self, token: &AuthToken) -> AuthorizationStatus {
        self.tokens
            .get(token)
            .map(|s| *s.value())
            .unwrap_or(AuthorizationStatus::Unknown)
    }

    fn provider(&self, mut info: AuthorizationInfo) -> AuthorizationInfo {
        info.provider_id = Some(self.name.clone());
        info
    }
}

impl Default for InMemoryRoamingNetwork {
    fn default() -> Self {
        Self::new("local")
    }
}

#[async_trait]
impl RoamingNetwork for InMemoryRoamingNetwork {
    async fn get_charging_session_by_id(&self, id: &ChargingSessionId) -> Option<ChargingSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    async fn get_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.clone())
    }

    async fn store_reservation(&self, reservation: Reservation) {
        debug!(network = %self.name, reservation_id = %reservation.id, "Reservation stored");
        self.reservations.insert(reservation.id.clone(), reservation);
    }

    async fn store_charging_session(&self, session: ChargingSession) {
        debug!(network = %self.name, session_id = %session.id, "Charging session stored");
        self.sessions.insert(session.id.clone(), session);
    }

    async fn authorize_start(
        &self,
        request: &AuthorizeStartRequest,
        _ctx: &EventContext,
    ) -> Result<AuthorizationInfo, RemoteError> {
        let info = match self.token_status(&request.auth_token) {
            AuthorizationStatus::Authorized => {
                let session_id = request.session_id.clone().unwrap_or_default();
                AuthorizationInfo::authorized(Some(session_id))
            }
            AuthorizationStatus::Blocked => AuthorizationInfo {
                status: AuthorizationStatus::Blocked,
                session_id: None,
                provider_id: None,
                description: Some(format!("Token '{}' is blocked", request.auth_token)),
            },
            _ => AuthorizationInfo::not_authorized(format!(
                "Token '{}' is unknown",
                request.auth_token
            )),
        };
        Ok(self.provider(info))
    }

    async fn authorize_stop(
        &self,
        request: &AuthorizeStopRequest,
        _ctx: &EventContext,
    ) -> Result<AuthorizationInfo, RemoteError> {
        let Some(session) = self.sessions.get(&request.session_id).map(|s| s.clone()) else {
            return Ok(self.provider(AuthorizationInfo::not_authorized(format!(
                "Unknown charging session '{}'",
                request.session_id
            ))));
        };

        // the starting token may always stop its own session
        let owns_session = session.auth_token.as_ref() == Some(&request.auth_token);
        let info = if owns_session
            || self.token_status(&request.auth_token) == AuthorizationStatus::Authorized
        {
            AuthorizationInfo::authorized(Some(session.id))
        } else {
            AuthorizationInfo::not_authorized(format!(
                "Token '{}' may not stop session '{}'",
                request.auth_token, request.session_id
            ))
        };
        Ok(self.provider(info))
    }
}
