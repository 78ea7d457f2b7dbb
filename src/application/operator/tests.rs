use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::application::events::{create_event_bus, Event, EventSubscriber};
use crate::application::ports::DEFAULT_RESERVATION_SECS;
use crate::application::ports::RoamingNetwork;
use crate::domain::{
    AuthorizationInfo, CancelReservationReason, CommandOutcome, DispatchStatus, RemoteError,
    ReservationLevel, ReservationStatus, TariffPricing,
};
use crate::infrastructure::InMemoryRoamingNetwork;

// ── Fixtures ───────────────────────────────────────────────────

fn operator_with(mode: AddMode) -> Arc<ChargingStationOperator> {
    ChargingStationOperator::new(
        "DE*GEF".parse().unwrap(),
        NodeDraft::named("en", "GraphDefined"),
        OperatorSettings {
            add_mode: mode,
            ..OperatorSettings::default()
        },
        create_event_bus(256),
    )
}

fn operator() -> Arc<ChargingStationOperator> {
    operator_with(AddMode::Idempotent)
}

fn pool_id(s: &str) -> ChargingPoolId {
    format!("DE*GEF*{}", s).parse().unwrap()
}

fn station_id(s: &str) -> ChargingStationId {
    format!("DE*GEF*{}", s).parse().unwrap()
}

fn evse_id(s: &str) -> EvseId {
    format!("DE*GEF*{}", s).parse().unwrap()
}

/// P1 → S1 → E1, E2
fn small_tree(operator: &Arc<ChargingStationOperator>) -> (Arc<ChargingPool>, Arc<ChargingStation>) {
    let ctx = EventContext::new();
    let pool = operator
        .create_pool(pool_id("P1"), NodeDraft::default(), &ctx)
        .entity
        .unwrap();
    let station = pool
        .create_station(station_id("S1"), NodeDraft::default(), &ctx)
        .entity
        .unwrap();
    station.create_evse(evse_id("E1"), NodeDraft::default(), &ctx);
    station.create_evse(evse_id("E2"), NodeDraft::default(), &ctx);
    (pool, station)
}

fn tariff(s: &str) -> ChargingTariff {
    ChargingTariff::new(
        format!("DE*GEF*{}", s).parse().unwrap(),
        I18nString::create("en", "AC standard"),
        TariffPricing::per_kwh("EUR", Decimal::new(39, 2)),
    )
}

fn responses(sub: &mut EventSubscriber) -> Vec<CommandResponseSummary> {
    sub.drain()
        .into_iter()
        .filter_map(|m| match m.event {
            Event::CommandResponse(e) => Some(CommandResponseSummary {
                status: e.status,
                has_location: e.location.is_some(),
                runtime_recorded: e.runtime > Duration::ZERO,
            }),
            _ => None,
        })
        .collect()
}

#[derive(Debug, PartialEq)]
struct CommandResponseSummary {
    status: DispatchStatus,
    has_location: bool,
    runtime_recorded: bool,
}

/// Remote delegate that counts calls and answers with success
#[derive(Default)]
struct SpyDelegate {
    calls: AtomicUsize,
    delay: Option<Duration>,
    panic: bool,
    fail: bool,
}

impl SpyDelegate {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("delegate exploded");
        }
        if self.fail {
            return Err(RemoteError::Unreachable("station offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteChargingDelegate for SpyDelegate {
    async fn reserve(
        &self,
        request: &ReserveRequest,
        _ctx: &EventContext,
    ) -> Result<DispatchResult<Reservation>, RemoteError> {
        self.enter().await?;
        let mut reservation = Reservation::new(
            request.reservation_id.clone().unwrap_or_default(),
            request.location.clone(),
            request.level,
            request.start.unwrap_or_else(Utc::now),
            chrono::Duration::seconds(request.duration_secs.unwrap_or(DEFAULT_RESERVATION_SECS)),
        );
        reservation.auth_token = request.auth_token.clone();
        Ok(DispatchResult::success(reservation))
    }

    async fn cancel_reservation(
        &self,
        _request: &CancelReservationRequest,
        _ctx: &EventContext,
    ) -> Result<DispatchResult<Reservation>, RemoteError> {
        self.enter().await?;
        Ok(DispatchResult::new(DispatchStatus::Success, None, None))
    }

    async fn remote_start(
        &self,
        request: &RemoteStartRequest,
        _ctx: &EventContext,
    ) -> Result<DispatchResult<ChargingSession>, RemoteError> {
        self.enter().await?;
        let mut session = ChargingSession::new(
            request.session_id.clone().unwrap_or_default(),
            request.location.clone(),
        );
        session.reservation_id = request.reservation_id.clone();
        session.auth_token = request.auth_token.clone();
        Ok(DispatchResult::success(session))
    }

    async fn remote_stop(
        &self,
        _request: &RemoteStopRequest,
        _ctx: &EventContext,
    ) -> Result<DispatchResult<ChargingSession>, RemoteError> {
        self.enter().await?;
        Ok(DispatchResult::new(DispatchStatus::Success, None, None))
    }
}

fn attach_spy(operator: &ChargingStationOperator, spy: SpyDelegate) -> Arc<SpyDelegate> {
    let spy = Arc::new(spy);
    operator.set_remote_delegate(Some(spy.clone()));
    spy
}

// ── Registry behaviour through the aggregate ───────────────────

#[test]
fn pool_add_get_remove() {
    let operator = operator();
    let ctx = EventContext::new();

    let created = operator.create_pool(pool_id("P1"), NodeDraft::named("en", "Jena"), &ctx);
    assert!(created.is_success());
    let pool = created.entity.unwrap();
    assert_eq!(pool.operator_id(), Some(operator.id().clone()));

    let again = operator.create_pool(pool_id("P1"), NodeDraft::default(), &ctx);
    assert_eq!(again.outcome, CommandOutcome::NoOperation);
    assert!(Arc::ptr_eq(&again.entity.unwrap(), &pool));

    assert!(operator.pool(&pool_id("P1")).is_some());
    assert!(operator.remove_pool(&pool_id("P1"), &ctx).is_success());
    assert!(operator.pool(&pool_id("P1")).is_none());
    assert!(operator.remove_pool(&pool_id("P1"), &ctx).is_error());
}

#[test]
fn strict_mode_rejects_duplicate_pool() {
    let operator = operator_with(AddMode::Strict);
    let ctx = EventContext::new();
    operator.create_pool(pool_id("P1"), NodeDraft::default(), &ctx);

    let again = operator.create_pool(pool_id("P1"), NodeDraft::default(), &ctx);
    assert_eq!(again.outcome, CommandOutcome::Error);
    assert!(matches!(again.error, Some(RegistryError::AlreadyExists { .. })));
    assert_eq!(operator.pools().len(), 1);
}

#[test]
fn evse_addition_bubbles_to_operator() {
    let operator = operator();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _sub = operator.evse_buses().addition.on_notify(move |e| {
        assert_eq!(e.owner.to_string(), "DE*GEF*S1");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    small_tree(&operator);

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(operator.evse_ids(), vec![evse_id("E1"), evse_id("E2")]);
    assert_eq!(
        operator.evse(&evse_id("E2")).unwrap().station_id(),
        Some(station_id("S1"))
    );
}

#[test]
fn operator_can_veto_evse_three_levels_down() {
    let operator = operator();
    let _veto = operator
        .evse_buses()
        .addition
        .on_vote(|e| e.entity.id().suffix() != "GEF*FORBIDDEN");
    let (_, station) = small_tree(&operator);
    let ctx = EventContext::new();

    let refused = station.create_evse(evse_id("FORBIDDEN"), NodeDraft::default(), &ctx);
    assert!(matches!(refused.error, Some(RegistryError::VetoRejected { .. })));
    assert!(!station.contains_evse(&evse_id("FORBIDDEN")));
    assert!(!operator.contains_evse(&evse_id("FORBIDDEN")));
}

#[test]
fn station_ids_are_unique_across_pools() {
    let operator = operator();
    small_tree(&operator);
    let ctx = EventContext::new();
    let other = operator
        .create_pool(pool_id("P2"), NodeDraft::default(), &ctx)
        .entity
        .unwrap();

    let clash = other.create_station(station_id("S1"), NodeDraft::default(), &ctx);
    assert!(clash.is_error());
    assert!(!other.contains_station(&station_id("S1")));
    assert_eq!(
        operator.station(&station_id("S1")).unwrap().pool_id(),
        Some(pool_id("P1"))
    );
}

#[test]
fn concurrent_station_adds_in_two_pools_admit_one() {
    let operator = operator();
    let ctx = EventContext::new();
    let pools: Vec<Arc<ChargingPool>> = ["P1", "P2"]
        .iter()
        .map(|p| {
            operator
                .create_pool(pool_id(p), NodeDraft::default(), &ctx)
                .entity
                .unwrap()
        })
        .collect();
    // widen the window between the uniqueness vote and the notify
    let _slow = operator.station_buses().addition.on_vote(|_| {
        std::thread::sleep(Duration::from_millis(50));
        true
    });
    let barrier = std::sync::Barrier::new(2);

    let results: Vec<CommandResult<ChargingStation>> = std::thread::scope(|scope| {
        let handles: Vec<_> = pools
            .iter()
            .map(|pool| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    pool.create_station(station_id("S1"), NodeDraft::default(), &EventContext::new())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 1);
    assert_eq!(results.iter().filter(|r| r.is_error()).count(), 1);
    let holders = pools
        .iter()
        .filter(|pool| pool.contains_station(&station_id("S1")))
        .count();
    assert_eq!(holders, 1);
    assert_eq!(operator.station_ids(), vec![station_id("S1")]);
}

#[test]
fn removing_pool_evicts_stations_and_evses() {
    let operator = operator();
    small_tree(&operator);
    let ctx = EventContext::new();
    assert_eq!(operator.stations().len(), 1);
    assert_eq!(operator.evses().len(), 2);

    operator.remove_pool(&pool_id("P1"), &ctx);

    assert!(operator.stations().is_empty());
    assert!(operator.evses().is_empty());
    assert!(operator.evse(&evse_id("E1")).is_none());
}

#[test]
fn removing_station_evicts_its_evses_and_memberships() {
    let operator = operator();
    let (pool, _) = small_tree(&operator);
    let ctx = EventContext::new();

    let group_id: EvseGroupId = "DE*GEF*G1".parse().unwrap();
    operator.create_evse_group(group_id.clone(), I18nString::create("en", "Fast"), &ctx);
    assert!(operator
        .add_evse_to_group(&group_id, evse_id("E1"), &ctx)
        .is_success());
    let station_group: ChargingStationGroupId = "DE*GEF*SG1".parse().unwrap();
    operator.create_station_group(station_group.clone(), I18nString::new(), &ctx);
    operator.add_station_to_group(&station_group, station_id("S1"), &ctx);

    assert!(pool.remove_station(&station_id("S1"), &ctx).is_success());

    assert!(operator.evses().is_empty());
    assert!(operator.evse_group(&group_id).unwrap().is_empty());
    assert!(operator.station_group(&station_group).unwrap().is_empty());
}

#[test]
fn removing_evse_updates_index() {
    let operator = operator();
    let (_, station) = small_tree(&operator);
    let ctx = EventContext::new();

    assert!(station.remove_evse(&evse_id("E1"), &ctx).is_success());
    assert_eq!(operator.evse_ids(), vec![evse_id("E2")]);
}

// ── Groups and tariffs ─────────────────────────────────────────

#[test]
fn group_members_must_exist() {
    let operator = operator();
    small_tree(&operator);
    let ctx = EventContext::new();
    let group_id: EvseGroupId = "DE*GEF*G1".parse().unwrap();

    let no_group = operator.add_evse_to_group(&group_id, evse_id("E1"), &ctx);
    assert!(matches!(no_group.error, Some(RegistryError::NotFound { .. })));

    operator.create_evse_group(group_id.clone(), I18nString::new(), &ctx);
    let no_member = operator.add_evse_to_group(&group_id, evse_id("E9"), &ctx);
    assert!(matches!(no_member.error, Some(RegistryError::NotFound { .. })));

    assert!(operator.add_evse_to_group(&group_id, evse_id("E1"), &ctx).is_success());
    assert!(operator
        .add_evse_to_group(&group_id, evse_id("E1"), &ctx)
        .is_no_operation());
    assert_eq!(operator.evse_group(&group_id).unwrap().members(), vec![evse_id("E1")]);

    assert!(operator
        .remove_evse_from_group(&group_id, &evse_id("E1"), &ctx)
        .is_success());
    assert!(operator.evse_group(&group_id).unwrap().is_empty());
}

#[test]
fn grouped_tariff_cannot_be_removed() {
    let operator = operator();
    let ctx = EventContext::new();
    let tariff_id: ChargingTariffId = "DE*GEF*T1".parse().unwrap();
    let group_id: ChargingTariffGroupId = "DE*GEF*TG1".parse().unwrap();
    operator.add_tariff(tariff("T1"), &ctx);
    operator.create_tariff_group(group_id.clone(), I18nString::new(), &ctx);
    assert!(operator
        .add_tariff_to_group(&group_id, tariff_id.clone(), &ctx)
        .is_success());

    let refused = operator.remove_tariff(&tariff_id, &ctx);
    assert!(matches!(refused.error, Some(RegistryError::VetoRejected { .. })));
    assert!(operator.tariff(&tariff_id).is_some());

    operator.remove_tariff_from_group(&group_id, &tariff_id, &ctx);
    assert!(operator.remove_tariff(&tariff_id, &ctx).is_success());
}

#[test]
fn tariff_update_is_compare_and_swap() {
    let operator = operator();
    let ctx = EventContext::new();
    let original = operator.add_tariff(tariff("T1"), &ctx).entity.unwrap();

    let cheaper = original.repriced(TariffPricing::per_kwh("EUR", Decimal::new(29, 2)));
    let updated = operator.update_tariff(cheaper, &original, &ctx);
    assert!(updated.is_success());

    // the first instance is no longer current
    let stale = original.repriced(TariffPricing::per_kwh("EUR", Decimal::new(19, 2)));
    assert!(!operator.try_update_tariff(stale, &original, &ctx));
    assert_eq!(
        operator.tariff(original.id()).unwrap().pricing().price_per_kwh,
        Decimal::new(29, 2)
    );
}

// ── Status ─────────────────────────────────────────────────────

#[test]
fn aggregate_status_queries() {
    let operator = operator();
    small_tree(&operator);
    let ctx = EventContext::new();
    let evse = operator.evse(&evse_id("E2")).unwrap();
    evse.status().set(OperationalStatus::Charging, &ctx);
    evse.admin_status().set(AdminStatus::OutOfService, &ctx);

    let statuses = operator.evse_statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].id, evse_id("E1"));
    assert_eq!(statuses[1].value, OperationalStatus::Charging);
    assert_eq!(operator.evse_admin_statuses()[1].value, AdminStatus::OutOfService);
    assert_eq!(operator.pool_statuses().len(), 1);
    assert_eq!(operator.station_admin_statuses().len(), 1);

    let history = operator.evse_status_history(&evse_id("E2"), 0, Some(1)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, OperationalStatus::Charging);
    assert!(operator.evse_status_history(&evse_id("E9"), 0, None).is_none());
}

#[test]
fn snapshot_lists_children() {
    let operator = operator();
    small_tree(&operator);
    operator.add_tariff(tariff("T1"), &EventContext::new());

    let snapshot = operator.snapshot();
    assert_eq!(snapshot.pool_ids, vec![pool_id("P1")]);
    assert_eq!(snapshot.tariff_ids.len(), 1);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["id"], "DE*GEF");
    assert_eq!(json["name"]["en"], "GraphDefined");
}

// ── Command dispatch ───────────────────────────────────────────

#[tokio::test]
async fn out_of_service_evse_never_reaches_delegate() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    operator
        .evse(&evse_id("E1"))
        .unwrap()
        .admin_status()
        .set(AdminStatus::OutOfService, &EventContext::new());

    let result = operator
        .reserve(
            ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))),
            &CommandContext::new(),
        )
        .await;

    assert_eq!(result.status, DispatchStatus::OutOfService);
    assert_eq!(spy.calls(), 0);
    assert!(operator.reservations().is_empty());
}

#[tokio::test]
async fn out_of_service_pool_gates_its_evses() {
    let operator = operator();
    let (pool, _) = small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    pool.admin_status()
        .set(AdminStatus::OutOfService, &EventContext::new());

    let result = operator
        .remote_start(
            RemoteStartRequest::at(ChargingLocation::from_evse(evse_id("E2"))),
            &CommandContext::new(),
        )
        .await;

    assert_eq!(result.status, DispatchStatus::OutOfService);
    assert!(result.description.unwrap().contains("charging pool"));
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn resolves_by_evse_station_and_pool() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    let cmd = CommandContext::new();

    for location in [
        ChargingLocation::from_evse(evse_id("E1")),
        ChargingLocation::from_station(station_id("S1")),
        ChargingLocation::from_pool(pool_id("P1")),
    ] {
        let result = operator.reserve(ReserveRequest::at(location), &cmd).await;
        assert_eq!(result.status, DispatchStatus::Success);
    }
    assert_eq!(spy.calls(), 3);
    assert_eq!(operator.reservations().len(), 3);
}

#[tokio::test]
async fn unknown_location_publishes_response() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    let mut sub = operator.events().subscribe();

    let result = operator
        .reserve(
            ReserveRequest::at(ChargingLocation::from_evse(evse_id("E9"))),
            &CommandContext::new(),
        )
        .await;

    assert_eq!(result.status, DispatchStatus::UnknownLocation);
    assert_eq!(spy.calls(), 0);
    assert_eq!(
        responses(&mut sub),
        vec![CommandResponseSummary {
            status: DispatchStatus::UnknownLocation,
            has_location: true,
            runtime_recorded: true,
        }]
    );
}

#[tokio::test]
async fn remote_start_on_unknown_evse_is_unknown_location() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    let mut sub = operator.events().subscribe();

    let result = operator
        .remote_start(
            RemoteStartRequest::at(ChargingLocation::from_evse(evse_id("E9"))),
            &CommandContext::new(),
        )
        .await;

    assert_eq!(result.status, DispatchStatus::UnknownLocation);
    assert!(result.payload.is_none());
    assert_eq!(spy.calls(), 0);
    assert!(operator.charging_sessions().is_empty());
    assert_eq!(
        responses(&mut sub),
        vec![CommandResponseSummary {
            status: DispatchStatus::UnknownLocation,
            has_location: true,
            runtime_recorded: true,
        }]
    );
}

#[tokio::test]
async fn remote_start_resolves_by_evse_station_and_pool() {
    let operator = operator();
    let (pool, _) = small_tree(&operator);
    let at_operator = attach_spy(&operator, SpyDelegate::default());
    let at_pool = Arc::new(SpyDelegate::default());
    pool.set_remote_delegate(Some(at_pool.clone()));
    let cmd = CommandContext::new();

    for location in [
        ChargingLocation::from_evse(evse_id("E1")),
        ChargingLocation::from_station(station_id("S1")),
        ChargingLocation::from_pool(pool_id("P1")),
    ] {
        let result = operator
            .remote_start(RemoteStartRequest::at(location.clone()), &cmd)
            .await;
        assert_eq!(result.status, DispatchStatus::Success);
        assert_eq!(result.payload.unwrap().location, location);
    }
    // every level resolves up to P1, so its delegate answers all three
    assert_eq!(at_pool.calls(), 3);
    assert_eq!(at_operator.calls(), 0);
    assert_eq!(operator.charging_sessions().len(), 3);
}

#[tokio::test]
async fn no_delegate_is_offline() {
    let operator = operator();
    small_tree(&operator);

    let result = operator
        .reserve(
            ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))),
            &CommandContext::new(),
        )
        .await;
    assert_eq!(result.status, DispatchStatus::Offline);
}

#[tokio::test]
async fn nearest_delegate_wins() {
    let operator = operator();
    let (_, station) = small_tree(&operator);
    let at_operator = attach_spy(&operator, SpyDelegate::default());
    let at_station = Arc::new(SpyDelegate::default());
    station.set_remote_delegate(Some(at_station.clone()));
    let cmd = CommandContext::new();

    operator
        .reserve(ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))), &cmd)
        .await;
    operator
        .reserve(ReserveRequest::at(ChargingLocation::from_pool(pool_id("P1"))), &cmd)
        .await;

    assert_eq!(at_station.calls(), 1);
    assert_eq!(at_operator.calls(), 1);
}

#[tokio::test]
async fn slow_delegate_times_out() {
    let operator = operator();
    small_tree(&operator);
    attach_spy(
        &operator,
        SpyDelegate {
            delay: Some(Duration::from_secs(5)),
            ..SpyDelegate::default()
        },
    );

    let result = operator
        .reserve(
            ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))),
            &CommandContext::new().with_timeout(Duration::from_millis(20)),
        )
        .await;

    assert_eq!(result.status, DispatchStatus::Timeout);
    assert!(operator.reservations().is_empty());
}

#[tokio::test]
async fn cancelled_command_reports_canceled() {
    let operator = operator();
    small_tree(&operator);
    attach_spy(&operator, SpyDelegate::default());
    let token = CancellationToken::new();
    token.cancel();

    let result = operator
        .reserve(
            ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))),
            &CommandContext::new().with_cancellation(token),
        )
        .await;
    assert_eq!(result.status, DispatchStatus::Canceled);
}

#[tokio::test]
async fn delegate_panic_and_failure_become_error() {
    let operator = operator();
    small_tree(&operator);
    let location = ChargingLocation::from_evse(evse_id("E1"));
    let cmd = CommandContext::new();

    attach_spy(
        &operator,
        SpyDelegate {
            panic: true,
            ..SpyDelegate::default()
        },
    );
    let panicked = operator.reserve(ReserveRequest::at(location.clone()), &cmd).await;
    assert_eq!(panicked.status, DispatchStatus::Error);
    assert!(panicked.description.unwrap().contains("delegate exploded"));

    attach_spy(
        &operator,
        SpyDelegate {
            fail: true,
            ..SpyDelegate::default()
        },
    );
    let failed = operator.reserve(ReserveRequest::at(location), &cmd).await;
    assert_eq!(failed.status, DispatchStatus::Error);
    assert!(failed.description.unwrap().contains("station offline"));
}

#[tokio::test]
async fn reservation_lifecycle_with_roaming_network() {
    let operator = operator();
    small_tree(&operator);
    attach_spy(&operator, SpyDelegate::default());
    let network = Arc::new(InMemoryRoamingNetwork::new("hub"));
    operator.set_roaming_network(Some(network.clone()));
    let mut sub = operator.events().subscribe();
    let cmd = CommandContext::new();

    let reserved = operator
        .reserve(
            ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))),
            &cmd,
        )
        .await;
    let reservation = reserved.payload.unwrap();
    assert_eq!(reservation.operator_id, Some(operator.id().clone()));
    assert_eq!(network.reservation_count(), 1);
    assert!(operator.reservation(&reservation.id).is_some());

    let cancelled = operator
        .cancel_reservation(
            CancelReservationRequest {
                reservation_id: reservation.id.clone(),
                reason: CancelReservationReason::ByUser,
                provider_id: None,
            },
            &cmd,
        )
        .await;
    assert_eq!(cancelled.status, DispatchStatus::Success);
    assert_eq!(cancelled.payload.unwrap().status, ReservationStatus::Cancelled);
    assert!(operator.reservation(&reservation.id).is_none());

    let unknown = operator
        .cancel_reservation(
            CancelReservationRequest {
                reservation_id: ReservationId::from("nope"),
                reason: CancelReservationReason::Aborted,
                provider_id: None,
            },
            &cmd,
        )
        .await;
    assert_eq!(unknown.status, DispatchStatus::UnknownReservation);

    let kinds: Vec<&str> = sub
        .drain()
        .iter()
        .map(|m| m.event.event_type())
        .filter(|t| !t.ends_with("_request") && !t.ends_with("_response"))
        .collect();
    assert_eq!(kinds, vec!["new_reservation", "reservation_canceled"]);
}

#[tokio::test]
async fn session_lifecycle_marks_reservation_used() {
    let operator = operator();
    small_tree(&operator);
    attach_spy(&operator, SpyDelegate::default());
    let cmd = CommandContext::new();
    let location = ChargingLocation::from_evse(evse_id("E2"));

    let reservation = operator
        .reserve(ReserveRequest::at(location.clone()), &cmd)
        .await
        .payload
        .unwrap();
    let started = operator
        .remote_start(
            RemoteStartRequest {
                reservation_id: Some(reservation.id.clone()),
                ..RemoteStartRequest::at(location)
            },
            &cmd,
        )
        .await;
    let session = started.payload.unwrap();
    assert_eq!(
        operator.reservation(&reservation.id).unwrap().status,
        ReservationStatus::Used
    );
    assert_eq!(operator.charging_sessions().len(), 1);

    let stopped = operator
        .remote_stop(RemoteStopRequest::new(session.id.clone()), &cmd)
        .await;
    assert_eq!(stopped.status, DispatchStatus::Success);
    assert!(stopped.payload.unwrap().stopped_at.is_some());
    assert!(operator.charging_session(&session.id).is_none());

    let again = operator
        .remote_stop(RemoteStopRequest::new(session.id), &cmd)
        .await;
    assert_eq!(again.status, DispatchStatus::UnknownSession);
}

#[tokio::test]
async fn cancel_through_roaming_fallback_happens_once() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    let network = Arc::new(InMemoryRoamingNetwork::new("hub"));
    operator.set_roaming_network(Some(network.clone()));
    let id = ReservationId::from("R-ELSEWHERE");
    network
        .store_reservation(Reservation::new(
            id.clone(),
            ChargingLocation::from_evse(evse_id("E1")),
            ReservationLevel::Evse,
            Utc::now(),
            chrono::Duration::minutes(15),
        ))
        .await;
    let mut sub = operator.events().subscribe();
    let cmd = CommandContext::new();
    let cancel = || CancelReservationRequest {
        reservation_id: id.clone(),
        reason: CancelReservationReason::ByUser,
        provider_id: None,
    };

    let first = operator.cancel_reservation(cancel(), &cmd).await;
    assert_eq!(first.status, DispatchStatus::Success);
    assert_eq!(
        network.get_reservation(&id).await.unwrap().status,
        ReservationStatus::Cancelled
    );

    let second = operator.cancel_reservation(cancel(), &cmd).await;
    assert_eq!(second.status, DispatchStatus::UnknownReservation);
    assert_eq!(spy.calls(), 1);

    let kinds: Vec<&str> = sub
        .drain()
        .iter()
        .map(|m| m.event.event_type())
        .filter(|t| !t.ends_with("_request") && !t.ends_with("_response"))
        .collect();
    assert_eq!(kinds, vec!["reservation_canceled"]);
}

#[tokio::test]
async fn local_cancel_is_visible_to_roaming_network() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    let network = Arc::new(InMemoryRoamingNetwork::new("hub"));
    operator.set_roaming_network(Some(network.clone()));
    let cmd = CommandContext::new();

    let reservation = operator
        .reserve(ReserveRequest::at(ChargingLocation::from_evse(evse_id("E1"))), &cmd)
        .await
        .payload
        .unwrap();
    let cancel = || CancelReservationRequest {
        reservation_id: reservation.id.clone(),
        reason: CancelReservationReason::ByUser,
        provider_id: None,
    };

    assert_eq!(
        operator.cancel_reservation(cancel(), &cmd).await.status,
        DispatchStatus::Success
    );
    assert_eq!(
        operator.cancel_reservation(cancel(), &cmd).await.status,
        DispatchStatus::UnknownReservation
    );
    assert_eq!(spy.calls(), 2);
}

#[tokio::test]
async fn stop_through_roaming_fallback_happens_once() {
    let operator = operator();
    small_tree(&operator);
    let spy = attach_spy(&operator, SpyDelegate::default());
    let network = Arc::new(InMemoryRoamingNetwork::new("hub"));
    operator.set_roaming_network(Some(network.clone()));
    let id = ChargingSessionId::from("S-ELSEWHERE");
    network
        .store_charging_session(ChargingSession::new(
            id.clone(),
            ChargingLocation::from_evse(evse_id("E2")),
        ))
        .await;
    let cmd = CommandContext::new();

    let first = operator
        .remote_stop(RemoteStopRequest::new(id.clone()), &cmd)
        .await;
    assert_eq!(first.status, DispatchStatus::Success);
    assert!(network
        .get_charging_session_by_id(&id)
        .await
        .unwrap()
        .stopped_at
        .is_some());

    let second = operator
        .remote_stop(RemoteStopRequest::new(id), &cmd)
        .await;
    assert_eq!(second.status, DispatchStatus::UnknownSession);
    assert_eq!(spy.calls(), 1);
}

/// Roaming network whose writes hang
struct StallingRoaming {
    inner: InMemoryRoamingNetwork,
    stall: Duration,
}

#[async_trait]
impl RoamingNetwork for StallingRoaming {
    async fn get_charging_session_by_id(&self, id: &ChargingSessionId) -> Option<ChargingSession> {
        self.inner.get_charging_session_by_id(id).await
    }

    async fn get_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.inner.get_reservation(id).await
    }

    async fn store_reservation(&self, reservation: Reservation) {
        tokio::time::sleep(self.stall).await;
        self.inner.store_reservation(reservation).await
    }

    async fn store_charging_session(&self, session: ChargingSession) {
        tokio::time::sleep(self.stall).await;
        self.inner.store_charging_session(session).await
    }

    async fn authorize_start(
        &self,
        request: &AuthorizeStartRequest,
        ctx: &EventContext,
    ) -> Result<AuthorizationInfo, RemoteError> {
        self.inner.authorize_start(request, ctx).await
    }

    async fn authorize_stop(
        &self,
        request: &AuthorizeStopRequest,
        ctx: &EventContext,
    ) -> Result<AuthorizationInfo, RemoteError> {
        self.inner.authorize_stop(request, ctx).await
    }
}

#[tokio::test]
async fn stalled_roaming_write_does_not_outlive_deadline() {
    let operator = operator();
    small_tree(&operator);
    attach_spy(&operator, SpyDelegate::default());
    operator.set_roaming_network(Some(Arc::new(StallingRoaming {
        inner: InMemoryRoamingNetwork::default(),
        stall: Duration::from_secs(30),
    })));
    let location = ChargingLocation::from_evse(evse_id("E1"));
    let begun = std::time::Instant::now();

    let reserved = operator
        .reserve(
            ReserveRequest::at(location.clone()),
            &CommandContext::new().with_timeout(Duration::from_millis(50)),
        )
        .await;
    assert_eq!(reserved.status, DispatchStatus::Success);
    assert!(operator.reservation(&reserved.payload.unwrap().id).is_some());

    let token = CancellationToken::new();
    let cancel_soon = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_soon.cancel();
    });
    let started = operator
        .remote_start(
            RemoteStartRequest::at(location),
            &CommandContext::new().with_cancellation(token),
        )
        .await;
    assert_eq!(started.status, DispatchStatus::Success);

    assert!(begun.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn authorization_goes_through_roaming_network() {
    let operator = operator();
    small_tree(&operator);
    let cmd = CommandContext::new();

    let offline = operator
        .authorize_start(AuthToken::new("TOKEN1"), None, &cmd)
        .await;
    assert_eq!(offline.status, DispatchStatus::Offline);

    let network = Arc::new(InMemoryRoamingNetwork::default());
    network.allow_token(AuthToken::new("TOKEN1"));
    operator.set_roaming_network(Some(network));

    let allowed = operator
        .authorize_start(
            AuthToken::new("TOKEN1"),
            Some(ChargingLocation::from_evse(evse_id("E1"))),
            &cmd,
        )
        .await;
    assert_eq!(allowed.status, DispatchStatus::Success);
    assert!(allowed.payload.unwrap().session_id.is_some());

    let refused = operator
        .authorize_start(AuthToken::new("STRANGER"), None, &cmd)
        .await;
    assert_eq!(refused.status, DispatchStatus::Rejected);

    let nowhere = operator
        .authorize_start(
            AuthToken::new("TOKEN1"),
            Some(ChargingLocation::from_evse(evse_id("E9"))),
            &cmd,
        )
        .await;
    assert_eq!(nowhere.status, DispatchStatus::UnknownLocation);

    let stop = operator
        .authorize_stop(ChargingSessionId::from("missing"), AuthToken::new("TOKEN1"), None, &cmd)
        .await;
    assert_eq!(stop.status, DispatchStatus::Rejected);
}
