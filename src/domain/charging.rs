//! Charging value types: locations, reservations, sessions, authorization

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{ChargingPoolId, ChargingStationId, EvseId, OperatorId};

/// Reference to a place in the charging hierarchy.
///
/// The most specific id present wins during resolution:
/// EVSE, then station, then pool, then the operator itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingLocation {
    pub operator_id: Option<OperatorId>,
    pub pool_id: Option<ChargingPoolId>,
    pub station_id: Option<ChargingStationId>,
    pub evse_id: Option<EvseId>,
}

impl ChargingLocation {
    pub fn from_operator(id: OperatorId) -> Self {
        Self {
            operator_id: Some(id),
            ..Self::default()
        }
    }

    pub fn from_pool(id: ChargingPoolId) -> Self {
        Self {
            pool_id: Some(id),
            ..Self::default()
        }
    }

    pub fn from_station(id: ChargingStationId) -> Self {
        Self {
            station_id: Some(id),
            ..Self::default()
        }
    }

    pub fn from_evse(id: EvseId) -> Self {
        Self {
            evse_id: Some(id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operator_id.is_none()
            && self.pool_id.is_none()
            && self.station_id.is_none()
            && self.evse_id.is_none()
    }
}

impl fmt::Display for ChargingLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.evse_id {
            write!(f, "EVSE {}", id)
        } else if let Some(id) = &self.station_id {
            write!(f, "station {}", id)
        } else if let Some(id) = &self.pool_id {
            write!(f, "pool {}", id)
        } else if let Some(id) = &self.operator_id {
            write!(f, "operator {}", id)
        } else {
            write!(f, "<empty location>")
        }
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_id!(
    /// Reservation identifier
    ReservationId
);
uuid_id!(
    /// Charging session identifier
    ChargingSessionId
);

/// Authentication token (RFID uid, contract id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Granularity of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReservationLevel {
    #[default]
    Evse,
    ChargingStation,
    ChargingPool,
}

/// Requested charging product (tariff/plan reference)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingProduct {
    pub id: String,
    pub min_duration: Option<i64>,
    pub max_duration: Option<i64>,
}

/// What to do with a reservation when its session is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReservationHandling {
    #[default]
    Close,
    KeepAlive,
}

/// Why a reservation was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReservationReason {
    ByUser,
    Expired,
    Aborted,
}

/// Reservation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Accepted,
    Cancelled,
    Expired,
    Used,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Cancelled => "Cancelled",
            Self::Expired => "Expired",
            Self::Used => "Used",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A held charging slot.
///
/// Owned by the roaming network; the operator only keeps a back-reference
/// (`operator_id`) for the reservations created through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub location: ChargingLocation,
    pub level: ReservationLevel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub auth_token: Option<AuthToken>,
    pub provider_id: Option<String>,
    pub status: ReservationStatus,
    pub operator_id: Option<OperatorId>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        location: ChargingLocation,
        level: ReservationLevel,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            location,
            level,
            start,
            end: start + duration,
            auth_token: None,
            provider_id: None,
            status: ReservationStatus::Accepted,
            operator_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn cancel(&mut self) {
        self.status = ReservationStatus::Cancelled;
    }

    pub fn mark_used(&mut self) {
        self.status = ReservationStatus::Used;
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Accepted && Utc::now() <= self.end
    }
}

/// An active (or finished) charging transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub id: ChargingSessionId,
    pub location: ChargingLocation,
    pub reservation_id: Option<ReservationId>,
    pub auth_token: Option<AuthToken>,
    pub product: Option<ChargingProduct>,
    pub provider_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub operator_id: Option<OperatorId>,
}

impl ChargingSession {
    pub fn new(id: ChargingSessionId, location: ChargingLocation) -> Self {
        Self {
            id,
            location,
            reservation_id: None,
            auth_token: None,
            product: None,
            provider_id: None,
            started_at: Utc::now(),
            stopped_at: None,
            operator_id: None,
        }
    }

    pub fn stop(&mut self, at: DateTime<Utc>) {
        self.stopped_at = Some(at);
    }

    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Outcome of an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Authorized,
    NotAuthorized,
    Blocked,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationInfo {
    pub status: AuthorizationStatus,
    pub session_id: Option<ChargingSessionId>,
    pub provider_id: Option<String>,
    pub description: Option<String>,
}

impl AuthorizationInfo {
    pub fn authorized(session_id: Option<ChargingSessionId>) -> Self {
        Self {
            status: AuthorizationStatus::Authorized,
            session_id,
            provider_id: None,
            description: None,
        }
    }

    pub fn not_authorized(description: impl Into<String>) -> Self {
        Self {
            status: AuthorizationStatus::NotAuthorized,
            session_id: None,
            provider_id: None,
            description: Some(description.into()),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.status == AuthorizationStatus::Authorized
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reservation() -> Reservation {
        Reservation::new(
            ReservationId::new(),
            ChargingLocation::from_evse("DE*GEF*E1".parse().unwrap()),
            ReservationLevel::Evse,
            Utc::now(),
            Duration::minutes(15),
        )
    }

    #[test]
    fn new_reservation_is_active() {
        let r = sample_reservation();
        assert!(r.is_active());
        assert_eq!(r.status, ReservationStatus::Accepted);
        assert!(r.operator_id.is_none());
    }

    #[test]
    fn cancelled_reservation_is_inactive() {
        let mut r = sample_reservation();
        r.cancel();
        assert_eq!(r.status, ReservationStatus::Cancelled);
        assert!(!r.is_active());
    }

    #[test]
    fn elapsed_reservation_is_inactive() {
        let mut r = sample_reservation();
        r.end = Utc::now() - Duration::hours(1);
        assert!(!r.is_active());
    }

    #[test]
    fn location_display_uses_most_specific_id() {
        let mut location = ChargingLocation::from_station("DE*GEF*S1".parse().unwrap());
        assert_eq!(location.to_string(), "station DE*GEF*S1");
        location.evse_id = Some("DE*GEF*E1".parse().unwrap());
        assert_eq!(location.to_string(), "EVSE DE*GEF*E1");
        assert!(ChargingLocation::default().is_empty());
    }

    #[test]
    fn stopped_session_is_inactive() {
        let mut session = ChargingSession::new(
            ChargingSessionId::new(),
            ChargingLocation::from_evse("DE*GEF*E1".parse().unwrap()),
        );
        assert!(session.is_active());
        session.stop(Utc::now());
        assert!(!session.is_active());
    }
}
