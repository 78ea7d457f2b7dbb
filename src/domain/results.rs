//! Result types of registry mutations and dispatched commands

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::context::EventTrackingId;
use super::error::RegistryError;

/// Coarse outcome of a registry mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Success,
    NoOperation,
    Error,
}

/// Result of a registry mutation (add / update / remove).
#[derive(Debug, Clone)]
pub struct CommandResult<E> {
    pub outcome: CommandOutcome,
    pub entity: Option<Arc<E>>,
    pub error: Option<RegistryError>,
    pub reason: Option<String>,
    pub event_tracking_id: EventTrackingId,
}

impl<E> CommandResult<E> {
    pub fn success(entity: Arc<E>, event_tracking_id: &EventTrackingId) -> Self {
        Self {
            outcome: CommandOutcome::Success,
            entity: Some(entity),
            error: None,
            reason: None,
            event_tracking_id: event_tracking_id.clone(),
        }
    }

    pub fn no_operation(
        entity: Option<Arc<E>>,
        reason: impl Into<String>,
        event_tracking_id: &EventTrackingId,
    ) -> Self {
        Self {
            outcome: CommandOutcome::NoOperation,
            entity,
            error: None,
            reason: Some(reason.into()),
            event_tracking_id: event_tracking_id.clone(),
        }
    }

    pub fn error(error: RegistryError, event_tracking_id: &EventTrackingId) -> Self {
        Self {
            outcome: CommandOutcome::Error,
            entity: None,
            reason: Some(error.to_string()),
            error: Some(error),
            event_tracking_id: event_tracking_id.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CommandOutcome::Success
    }

    pub fn is_no_operation(&self) -> bool {
        self.outcome == CommandOutcome::NoOperation
    }

    pub fn is_error(&self) -> bool {
        self.outcome == CommandOutcome::Error
    }

    /// Human-readable reason, suitable for direct display
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Outcome of a dispatched remote command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchStatus {
    Success,
    /// Accepted, completion will be reported later
    AsyncOperation,
    Rejected,
    UnknownLocation,
    UnknownReservation,
    UnknownSession,
    OutOfService,
    /// No remote delegate or roaming network attached
    Offline,
    Timeout,
    Canceled,
    Error,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::AsyncOperation => "AsyncOperation",
            Self::Rejected => "Rejected",
            Self::UnknownLocation => "UnknownLocation",
            Self::UnknownReservation => "UnknownReservation",
            Self::UnknownSession => "UnknownSession",
            Self::OutOfService => "OutOfService",
            Self::Offline => "Offline",
            Self::Timeout => "Timeout",
            Self::Canceled => "Canceled",
            Self::Error => "Error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AsyncOperation)
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a dispatched command with an optional payload
/// (the created reservation, started session, ...).
#[derive(Debug, Clone)]
pub struct DispatchResult<T> {
    pub status: DispatchStatus,
    pub payload: Option<T>,
    pub description: Option<String>,
    pub runtime: Duration,
}

impl<T> DispatchResult<T> {
    pub fn new(status: DispatchStatus, payload: Option<T>, description: Option<String>) -> Self {
        Self {
            status,
            payload,
            description,
            runtime: Duration::ZERO,
        }
    }

    pub fn success(payload: T) -> Self {
        Self::new(DispatchStatus::Success, Some(payload), None)
    }

    pub fn status(status: DispatchStatus, description: impl Into<String>) -> Self {
        Self::new(status, None, Some(description.into()))
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self::status(DispatchStatus::Error, description)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }
}
