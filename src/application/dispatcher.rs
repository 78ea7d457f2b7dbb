//! Command dispatcher: routes remote charging commands into the hierarchy.
//!
//! Every command runs the same pipeline:
//!
//! ```text
//!   Request event
//!     → resolve location      (EVSE → station → pool, station → pool, pool)
//!     → admin gate            (every resolved level plus the operator)
//!     → nearest delegate      (station, pool, operator; none → Offline)
//!     → await with deadline   (timeout / cancellation / panic → typed status)
//!     → post-process          (back-references, roaming writes, New*/…Canceled events)
//!   Response event + metrics
//! ```
//!
//! Nothing is ever raised to the caller: every path ends in a
//! [`DispatchResult`] and exactly one response event. The deadline covers
//! the whole command, roaming lookups and writes included.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entity::Identifiable;
use super::events::{
    CommandKind, CommandRequestEvent, CommandResponseEvent, Event, ReservationEvent,
    SessionEvent, SharedEventBus,
};
use super::operator::{ChargingPool, ChargingStation, ChargingStationOperator, Evse};
use super::ports::{
    AuthorizeStartRequest, AuthorizeStopRequest, CancelReservationRequest,
    RemoteChargingDelegate, RemoteStartRequest, RemoteStopRequest, ReserveRequest,
};
use crate::domain::{
    AuthorizationInfo, ChargingLocation, ChargingSession, ChargingSessionId, DispatchResult,
    DispatchStatus, EventContext, RemoteError, Reservation, ReservationId, ReservationStatus,
};

/// Record command dispatch latency to Prometheus.
fn record_command_latency(command: CommandKind, status: DispatchStatus, runtime: Duration) {
    metrics::histogram!("cpo_command_latency_seconds", "command" => command.as_str())
        .record(runtime.as_secs_f64());
    metrics::counter!(
        "cpo_commands_total",
        "command" => command.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

/// Per-call options of a dispatched command
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub event: EventContext,
    /// Overrides the operator's request timeout
    pub timeout: Option<Duration>,
    pub cancellation: CancellationToken,
}

impl CommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl From<EventContext> for CommandContext {
    fn from(event: EventContext) -> Self {
        Self {
            event,
            ..Self::default()
        }
    }
}

/// The nodes a location resolved to. All `None` means the operator itself.
#[derive(Default)]
struct ResolvedLocation {
    evse: Option<Arc<Evse>>,
    station: Option<Arc<ChargingStation>>,
    pool: Option<Arc<ChargingPool>>,
}

pub struct CommandDispatcher {
    request_timeout: Duration,
    events: SharedEventBus,
    reservations: DashMap<ReservationId, Reservation>,
    sessions: DashMap<ChargingSessionId, ChargingSession>,
}

impl CommandDispatcher {
    pub fn new(request_timeout: Duration, events: SharedEventBus) -> Self {
        Self {
            request_timeout,
            events,
            reservations: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.reservations.iter().map(|r| r.value().clone()).collect()
    }

    pub fn reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.value().clone())
    }

    pub fn sessions(&self) -> Vec<ChargingSession> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn session(&self, id: &ChargingSessionId) -> Option<ChargingSession> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    // ── Commands ───────────────────────────────────────────────

    pub async fn reserve(
        &self,
        operator: &ChargingStationOperator,
        request: ReserveRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<Reservation> {
        let command = CommandKind::Reserve;
        let started = Instant::now();
        let parameters = to_parameters(&request);
        self.publish_request(operator, command, Some(&request.location), &parameters, cmd);

        let result = match self.prepare(operator, &request.location) {
            Err(early) => early,
            Ok(delegate) => {
                let result = self.run(cmd, started, delegate.reserve(&request, &cmd.event)).await;
                self.after_reserve(operator, result, started, cmd).await
            }
        };

        self.finish(operator, command, Some(request.location), parameters, result, started, cmd)
    }

    pub async fn cancel_reservation(
        &self,
        operator: &ChargingStationOperator,
        request: CancelReservationRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<Reservation> {
        let command = CommandKind::CancelReservation;
        let started = Instant::now();
        let parameters = to_parameters(&request);
        self.publish_request(operator, command, None, &parameters, cmd);

        let id = &request.reservation_id;
        let known = match (self.reservation(id), operator.roaming_network()) {
            (Some(reservation), _) => Some(reservation),
            (None, None) => None,
            (None, Some(network)) => match self.within(cmd, started, network.get_reservation(id)).await {
                Ok(found) => found,
                Err(interrupted) => {
                    return self.finish(operator, command, None, parameters, interrupted, started, cmd);
                }
            },
        };
        // a reservation the roaming network already knows as cancelled is gone
        let Some(known) = known.filter(|r| r.status != ReservationStatus::Cancelled) else {
            let result = DispatchResult::status(
                DispatchStatus::UnknownReservation,
                format!("Unknown reservation '{}'", request.reservation_id),
            );
            return self.finish(operator, command, None, parameters, result, started, cmd);
        };

        let location = known.location.clone();
        let result = match self.prepare(operator, &location) {
            Err(early) => early,
            Ok(delegate) => {
                let result = self
                    .run(cmd, started, delegate.cancel_reservation(&request, &cmd.event))
                    .await;
                if result.is_success() {
                    let mut cancelled = self
                        .reservations
                        .remove(&request.reservation_id)
                        .map(|(_, r)| r)
                        .or_else(|| result.payload.clone())
                        .unwrap_or(known);
                    cancelled.cancel();
                    if let Some(network) = operator.roaming_network() {
                        let reservation = cancelled.clone();
                        self.write_roaming(cmd, started, async move {
                            network.store_reservation(reservation).await
                        })
                        .await;
                    }
                    self.events.publish(Event::ReservationCanceled(ReservationEvent {
                        timestamp: Utc::now(),
                        event_tracking_id: cmd.event.event_tracking_id.clone(),
                        reservation: cancelled.clone(),
                    }));
                    DispatchResult {
                        payload: Some(cancelled),
                        ..result
                    }
                } else {
                    result
                }
            }
        };

        self.finish(operator, command, Some(location), parameters, result, started, cmd)
    }

    pub async fn remote_start(
        &self,
        operator: &ChargingStationOperator,
        request: RemoteStartRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<ChargingSession> {
        let command = CommandKind::RemoteStart;
        let started = Instant::now();
        let parameters = to_parameters(&request);
        self.publish_request(operator, command, Some(&request.location), &parameters, cmd);

        let result = match self.prepare(operator, &request.location) {
            Err(early) => early,
            Ok(delegate) => {
                let result = self
                    .run(cmd, started, delegate.remote_start(&request, &cmd.event))
                    .await;
                self.after_remote_start(operator, result, started, cmd).await
            }
        };

        self.finish(operator, command, Some(request.location), parameters, result, started, cmd)
    }

    pub async fn remote_stop(
        &self,
        operator: &ChargingStationOperator,
        request: RemoteStopRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<ChargingSession> {
        let command = CommandKind::RemoteStop;
        let started = Instant::now();
        let parameters = to_parameters(&request);
        self.publish_request(operator, command, None, &parameters, cmd);

        let id = &request.session_id;
        let known = match (self.session(id), operator.roaming_network()) {
            (Some(session), _) => Some(session),
            (None, None) => None,
            (None, Some(network)) => {
                match self.within(cmd, started, network.get_charging_session_by_id(id)).await {
                    Ok(found) => found,
                    Err(interrupted) => {
                        return self.finish(operator, command, None, parameters, interrupted, started, cmd);
                    }
                }
            }
        };
        // a session the roaming network already knows as stopped cannot be stopped again
        let Some(known) = known.filter(ChargingSession::is_active) else {
            let result = DispatchResult::status(
                DispatchStatus::UnknownSession,
                format!("Unknown charging session '{}'", request.session_id),
            );
            return self.finish(operator, command, None, parameters, result, started, cmd);
        };

        let location = known.location.clone();
        let result = match self.prepare(operator, &location) {
            Err(early) => early,
            Ok(delegate) => {
                let result = self
                    .run(cmd, started, delegate.remote_stop(&request, &cmd.event))
                    .await;
                if result.is_success() {
                    let mut stopped = self
                        .sessions
                        .remove(&request.session_id)
                        .map(|(_, s)| s)
                        .or_else(|| result.payload.clone())
                        .unwrap_or(known);
                    if stopped.stopped_at.is_none() {
                        stopped.stop(Utc::now());
                    }
                    if let Some(network) = operator.roaming_network() {
                        let session = stopped.clone();
                        self.write_roaming(cmd, started, async move {
                            network.store_charging_session(session).await
                        })
                        .await;
                    }
                    self.events.publish(Event::ChargingSessionStopped(SessionEvent {
                        timestamp: Utc::now(),
                        event_tracking_id: cmd.event.event_tracking_id.clone(),
                        session: stopped.clone(),
                    }));
                    DispatchResult {
                        payload: Some(stopped),
                        ..result
                    }
                } else {
                    result
                }
            }
        };

        self.finish(operator, command, Some(location), parameters, result, started, cmd)
    }

    pub async fn authorize_start(
        &self,
        operator: &ChargingStationOperator,
        request: AuthorizeStartRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<AuthorizationInfo> {
        let command = CommandKind::AuthorizeStart;
        let started = Instant::now();
        let parameters = to_parameters(&request);
        self.publish_request(operator, command, request.location.as_ref(), &parameters, cmd);

        let result = match self.gate_authorization(operator, request.location.as_ref()) {
            Err(early) => early,
            Ok(()) => match operator.roaming_network() {
                None => DispatchResult::status(DispatchStatus::Offline, "No roaming network attached"),
                Some(network) => {
                    let call = async {
                        network
                            .authorize_start(&request, &cmd.event)
                            .await
                            .map(authorization_result)
                    };
                    self.run(cmd, started, call).await
                }
            },
        };

        self.finish(operator, command, request.location, parameters, result, started, cmd)
    }

    pub async fn authorize_stop(
        &self,
        operator: &ChargingStationOperator,
        request: AuthorizeStopRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<AuthorizationInfo> {
        let command = CommandKind::AuthorizeStop;
        let started = Instant::now();
        let parameters = to_parameters(&request);
        self.publish_request(operator, command, request.location.as_ref(), &parameters, cmd);

        let result = match self.gate_authorization(operator, request.location.as_ref()) {
            Err(early) => early,
            Ok(()) => match operator.roaming_network() {
                None => DispatchResult::status(DispatchStatus::Offline, "No roaming network attached"),
                Some(network) => {
                    let call = async {
                        network
                            .authorize_stop(&request, &cmd.event)
                            .await
                            .map(authorization_result)
                    };
                    self.run(cmd, started, call).await
                }
            },
        };

        self.finish(operator, command, request.location, parameters, result, started, cmd)
    }

    // ── Pipeline steps ─────────────────────────────────────────

    fn resolve(
        &self,
        operator: &ChargingStationOperator,
        location: &ChargingLocation,
    ) -> Option<ResolvedLocation> {
        if let Some(owner) = &location.operator_id {
            if owner != operator.id() {
                return None;
            }
        }

        if let Some(evse_id) = &location.evse_id {
            let evse = operator.evse(evse_id)?;
            let station = evse.station()?;
            let pool = station.pool()?;
            return Some(ResolvedLocation {
                evse: Some(evse),
                station: Some(station),
                pool: Some(pool),
            });
        }
        if let Some(station_id) = &location.station_id {
            let station = operator.station(station_id)?;
            let pool = station.pool()?;
            return Some(ResolvedLocation {
                station: Some(station),
                pool: Some(pool),
                ..ResolvedLocation::default()
            });
        }
        if let Some(pool_id) = &location.pool_id {
            return operator.pool(pool_id).map(|pool| ResolvedLocation {
                pool: Some(pool),
                ..ResolvedLocation::default()
            });
        }
        location.operator_id.as_ref().map(|_| ResolvedLocation::default())
    }

    /// Every resolved level, and the operator, must accept commands.
    fn admin_gate<T>(
        &self,
        operator: &ChargingStationOperator,
        resolved: &ResolvedLocation,
    ) -> Result<(), DispatchResult<T>> {
        let mut levels = Vec::with_capacity(4);
        if let Some(evse) = &resolved.evse {
            levels.push((evse.entity_ref(), evse.admin_status().current()));
        }
        if let Some(station) = &resolved.station {
            levels.push((station.entity_ref(), station.admin_status().current()));
        }
        if let Some(pool) = &resolved.pool {
            levels.push((pool.entity_ref(), pool.admin_status().current()));
        }
        levels.push((operator.entity_ref(), operator.admin_status().current()));

        match levels.into_iter().find(|(_, status)| !status.accepts_commands()) {
            Some((entity, status)) => Err(DispatchResult::status(
                DispatchStatus::OutOfService,
                format!("{} '{}' is {}", entity.kind.name(), entity.id, status),
            )),
            None => Ok(()),
        }
    }

    /// Resolve, gate, pick the nearest delegate.
    fn prepare<T>(
        &self,
        operator: &ChargingStationOperator,
        location: &ChargingLocation,
    ) -> Result<Arc<dyn RemoteChargingDelegate>, DispatchResult<T>> {
        let resolved = self.resolve(operator, location).ok_or_else(|| {
            DispatchResult::status(
                DispatchStatus::UnknownLocation,
                format!("Unknown location: {}", location),
            )
        })?;
        self.admin_gate(operator, &resolved)?;

        resolved
            .station
            .as_ref()
            .and_then(|s| s.remote_delegate())
            .or_else(|| resolved.pool.as_ref().and_then(|p| p.remote_delegate()))
            .or_else(|| operator.remote_delegate())
            .ok_or_else(|| {
                DispatchResult::status(
                    DispatchStatus::Offline,
                    format!("No remote delegate for {}", location),
                )
            })
    }

    /// Authorization needs no delegate, but an explicit location must still
    /// resolve and pass the admin gate.
    fn gate_authorization<T>(
        &self,
        operator: &ChargingStationOperator,
        location: Option<&ChargingLocation>,
    ) -> Result<(), DispatchResult<T>> {
        let resolved = match location {
            Some(location) if !location.is_empty() => {
                self.resolve(operator, location).ok_or_else(|| {
                    DispatchResult::status(
                        DispatchStatus::UnknownLocation,
                        format!("Unknown location: {}", location),
                    )
                })?
            }
            _ => ResolvedLocation::default(),
        };
        self.admin_gate(operator, &resolved)
    }

    fn deadline(&self, cmd: &CommandContext) -> Duration {
        cmd.timeout.unwrap_or(self.request_timeout)
    }

    /// Await `fut` under what is left of the command's deadline and the
    /// cancellation token.
    async fn within<T, R, F>(
        &self,
        cmd: &CommandContext,
        started: Instant,
        fut: F,
    ) -> Result<R, DispatchResult<T>>
    where
        F: Future<Output = R>,
    {
        let deadline = self.deadline(cmd);
        let left = deadline.saturating_sub(started.elapsed());

        tokio::select! {
            biased;
            _ = cmd.cancellation.cancelled() => {
                Err(DispatchResult::status(DispatchStatus::Canceled, "Command was canceled"))
            }
            outcome = tokio::time::timeout(left, fut) => outcome.map_err(|_| {
                DispatchResult::status(
                    DispatchStatus::Timeout,
                    format!("No response within {:?}", deadline),
                )
            }),
        }
    }

    /// Await a delegate call under the deadline and the cancellation token.
    async fn run<T, F>(&self, cmd: &CommandContext, started: Instant, call: F) -> DispatchResult<T>
    where
        F: Future<Output = Result<DispatchResult<T>, RemoteError>>,
    {
        let guarded = AssertUnwindSafe(call).catch_unwind();

        match self.within(cmd, started, guarded).await {
            Err(interrupted) => interrupted,
            Ok(outcome) => match outcome {
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(error = %message, "Remote delegate panicked");
                    DispatchResult::error(message)
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "Remote delegate failed");
                    DispatchResult::error(err.to_string())
                }
                Ok(Ok(result)) => result,
            },
        }
    }

    /// Hand a write to the roaming network. The command stops waiting for it
    /// at its deadline or on cancellation; the write itself then finishes in
    /// the background.
    async fn write_roaming<F>(&self, cmd: &CommandContext, started: Instant, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(write);
        match self.within::<(), _, _>(cmd, started, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Roaming network write failed"),
            Err(interrupted) => warn!(
                status = %interrupted.status,
                "Roaming network write left running in the background"
            ),
        }
    }

    async fn after_reserve(
        &self,
        operator: &ChargingStationOperator,
        mut result: DispatchResult<Reservation>,
        started: Instant,
        cmd: &CommandContext,
    ) -> DispatchResult<Reservation> {
        if !result.is_success() {
            return result;
        }
        let Some(reservation) = result.payload.as_mut() else {
            return result;
        };
        reservation.operator_id = Some(operator.id().clone());
        let reservation = reservation.clone();

        self.reservations
            .insert(reservation.id.clone(), reservation.clone());
        if let Some(network) = operator.roaming_network() {
            let stored = reservation.clone();
            self.write_roaming(cmd, started, async move {
                network.store_reservation(stored).await
            })
            .await;
        }
        debug!(reservation_id = %reservation.id, "Reservation recorded");
        self.events.publish(Event::NewReservation(ReservationEvent {
            timestamp: Utc::now(),
            event_tracking_id: cmd.event.event_tracking_id.clone(),
            reservation,
        }));
        result
    }

    async fn after_remote_start(
        &self,
        operator: &ChargingStationOperator,
        mut result: DispatchResult<ChargingSession>,
        started: Instant,
        cmd: &CommandContext,
    ) -> DispatchResult<ChargingSession> {
        if !result.is_success() {
            return result;
        }
        let Some(session) = result.payload.as_mut() else {
            return result;
        };
        session.operator_id = Some(operator.id().clone());
        let session = session.clone();

        let used = session.reservation_id.as_ref().and_then(|reservation_id| {
            self.reservations.get_mut(reservation_id).map(|mut reservation| {
                reservation.mark_used();
                reservation.clone()
            })
        });
        self.sessions.insert(session.id.clone(), session.clone());
        if let Some(network) = operator.roaming_network() {
            let stored = session.clone();
            self.write_roaming(cmd, started, async move {
                if let Some(reservation) = used {
                    network.store_reservation(reservation).await;
                }
                network.store_charging_session(stored).await
            })
            .await;
        }
        debug!(session_id = %session.id, "Charging session recorded");
        self.events.publish(Event::NewChargingSession(SessionEvent {
            timestamp: Utc::now(),
            event_tracking_id: cmd.event.event_tracking_id.clone(),
            session,
        }));
        result
    }

    // ── Logging ────────────────────────────────────────────────

    fn publish_request(
        &self,
        operator: &ChargingStationOperator,
        command: CommandKind,
        location: Option<&ChargingLocation>,
        parameters: &Value,
        cmd: &CommandContext,
    ) {
        debug!(operator_id = %operator.id(), command = %command, "Command requested");
        self.events.publish(Event::CommandRequest(CommandRequestEvent {
            command,
            timestamp: Utc::now(),
            event_tracking_id: cmd.event.event_tracking_id.clone(),
            operator_id: operator.id().to_string(),
            location: location.cloned(),
            parameters: parameters.clone(),
        }));
    }

    #[allow(clippy::too_many_arguments)]
    fn finish<T>(
        &self,
        operator: &ChargingStationOperator,
        command: CommandKind,
        location: Option<ChargingLocation>,
        parameters: Value,
        result: DispatchResult<T>,
        started: Instant,
        cmd: &CommandContext,
    ) -> DispatchResult<T> {
        let runtime = started.elapsed();
        let result = result.with_runtime(runtime);

        info!(
            operator_id = %operator.id(),
            command = %command,
            status = %result.status,
            runtime_ms = runtime.as_millis() as u64,
            "Command dispatched"
        );
        self.events.publish(Event::CommandResponse(CommandResponseEvent {
            command,
            timestamp: Utc::now(),
            event_tracking_id: cmd.event.event_tracking_id.clone(),
            operator_id: operator.id().to_string(),
            location,
            parameters,
            status: result.status,
            description: result.description.clone(),
            runtime,
        }));
        record_command_latency(command, result.status, runtime);
        result
    }
}

fn to_parameters<P: Serialize>(request: &P) -> Value {
    serde_json::to_value(request).unwrap_or(Value::Null)
}

fn authorization_result(info: AuthorizationInfo) -> DispatchResult<AuthorizationInfo> {
    let status = if info.is_authorized() {
        DispatchStatus::Success
    } else {
        DispatchStatus::Rejected
    };
    let description = info.description.clone();
    DispatchResult::new(status, Some(info), description)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Remote delegate panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Remote delegate panicked: {}", message)
    } else {
        "Remote delegate panicked".to_string()
    }
}
