//! Admin status (operability) and operational status (live state)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operability of an entity, set by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdminStatus {
    Unspecified,
    Planned,
    InDeployment,
    Operational,
    InternalUse,
    OutOfService,
    Blocked,
}

impl AdminStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Planned => "Planned",
            Self::InDeployment => "InDeployment",
            Self::Operational => "Operational",
            Self::InternalUse => "InternalUse",
            Self::OutOfService => "OutOfService",
            Self::Blocked => "Blocked",
        }
    }

    /// Whether remote commands may be dispatched to an entity in this state
    pub fn accepts_commands(&self) -> bool {
        matches!(self, Self::Operational | Self::InternalUse)
    }
}

impl Default for AdminStatus {
    fn default() -> Self {
        Self::Operational
    }
}

impl std::fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live state of an entity, reported by the infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationalStatus {
    Unspecified,
    Available,
    Reserved,
    Charging,
    Occupied,
    Offline,
    Error,
    OutOfService,
}

impl OperationalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Available => "Available",
            Self::Reserved => "Reserved",
            Self::Charging => "Charging",
            Self::Occupied => "Occupied",
            Self::Offline => "Offline",
            Self::Error => "Error",
            Self::OutOfService => "OutOfService",
        }
    }
}

impl Default for OperationalStatus {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl std::fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value together with the time it became effective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub timestamp: DateTime<Utc>,
    pub value: T,
}

impl<T> Timestamped<T> {
    pub fn new(timestamp: DateTime<Utc>, value: T) -> Self {
        Self { timestamp, value }
    }

    pub fn now(value: T) -> Self {
        Self::new(Utc::now(), value)
    }
}
