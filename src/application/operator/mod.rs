//! Charging station operator, the aggregate root of one tenant
//!
//! ```text
//!   ChargingStationOperator
//!   ├── pools ──► ChargingPool ── stations ──► ChargingStation ── evses ──► Evse
//!   ├── station index / EVSE index   (flat, fed by bubbled registry events)
//!   ├── tariffs, tariff groups, station groups, EVSE groups
//!   └── CommandDispatcher            (reserve, remote start/stop, ...)
//! ```
//!
//! Child registries bubble their addition/update/removal buses upward when a
//! child is adopted, so the operator can veto and observe changes three
//! levels below without walking the tree.

pub mod evse;
pub mod groups;
pub mod pool;
pub mod station;
pub mod tariff;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

pub use evse::{Evse, EvseSnapshot};
pub use groups::{ChargingStationGroup, ChargingTariffGroup, EvseGroup, Group, GroupSnapshot};
pub use pool::{ChargingPool, ChargingPoolSnapshot};
pub use station::{ChargingStation, ChargingStationSnapshot};
pub use tariff::ChargingTariff;

use super::dispatcher::{CommandContext, CommandDispatcher};
use super::entity::{admin_status_report, status_report, Identifiable, StatusReport};
use super::events::{EntityKind, EntityRef, SharedEventBus};
use super::index::SecondaryIndex;
use super::node::{node_accessors, NodeDraft, NodeState, NodeStatusView, RemoteSlot};
use super::ports::{
    AuthorizeStartRequest, AuthorizeStopRequest, CancelReservationRequest,
    RemoteChargingDelegate, RemoteStartRequest, RemoteStopRequest, ReserveRequest, RoamingNetwork,
};
use super::registry::{AddMode, EntityRegistry, RegistryBuses};
use super::voting::Subscription;
use crate::domain::{
    AdminStatus, AuthToken, AuthorizationInfo, ChargingLocation, ChargingPoolId, ChargingSession,
    ChargingSessionId, ChargingStationGroupId, ChargingStationId, ChargingTariffGroupId,
    ChargingTariffId, CommandResult, DispatchResult, EventContext, EvseGroupId, EvseId,
    I18nString, OperationalStatus, OperatorId, RegistryError, Reservation, ReservationId,
    Timestamped, DEFAULT_HISTORY_SIZE,
};

/// Runtime settings shared by an operator and everything below it
#[derive(Debug, Clone)]
pub struct OperatorSettings {
    pub status_history_size: usize,
    pub add_mode: AddMode,
    pub request_timeout: Duration,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            status_history_size: DEFAULT_HISTORY_SIZE,
            add_mode: AddMode::Idempotent,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ChargingStationOperator {
    id: OperatorId,
    node: NodeState,
    settings: OperatorSettings,
    events: SharedEventBus,

    pools: EntityRegistry<OperatorId, ChargingPool>,
    station_buses: RegistryBuses<ChargingPoolId, ChargingStation>,
    evse_buses: RegistryBuses<ChargingStationId, Evse>,
    station_index: Arc<SecondaryIndex<ChargingStation>>,
    evse_index: Arc<SecondaryIndex<Evse>>,

    tariffs: EntityRegistry<OperatorId, ChargingTariff>,
    tariff_groups: EntityRegistry<OperatorId, ChargingTariffGroup>,
    station_groups: EntityRegistry<OperatorId, ChargingStationGroup>,
    evse_groups: EntityRegistry<OperatorId, EvseGroup>,

    remote: RemoteSlot,
    roaming: RwLock<Option<Arc<dyn RoamingNetwork>>>,
    dispatcher: CommandDispatcher,
    wiring: Mutex<Vec<Subscription>>,
}

impl ChargingStationOperator {
    pub fn new(
        id: OperatorId,
        draft: NodeDraft,
        settings: OperatorSettings,
        events: SharedEventBus,
    ) -> Arc<Self> {
        let mode = settings.add_mode;
        let operator = Arc::new(Self {
            node: NodeState::new(
                EntityRef::new(EntityKind::Operator, &id),
                draft,
                settings.status_history_size,
                &events,
            ),
            pools: EntityRegistry::new(id.clone(), mode),
            station_buses: RegistryBuses::new("operator stations"),
            evse_buses: RegistryBuses::new("operator evses"),
            station_index: Arc::new(SecondaryIndex::new()),
            evse_index: Arc::new(SecondaryIndex::new()),
            tariffs: EntityRegistry::new(id.clone(), mode),
            tariff_groups: EntityRegistry::new(id.clone(), mode),
            station_groups: EntityRegistry::new(id.clone(), mode),
            evse_groups: EntityRegistry::new(id.clone(), mode),
            remote: RemoteSlot::default(),
            roaming: RwLock::new(None),
            dispatcher: CommandDispatcher::new(settings.request_timeout, events.clone()),
            wiring: Mutex::new(Vec::new()),
            settings,
            events,
            id,
        });
        operator.connect();
        info!(operator_id = %operator.id, "Charging station operator created");
        operator
    }

    /// Internal wiring: indexes, uniqueness and integrity vetoes, cascades.
    fn connect(self: &Arc<Self>) {
        let mut wiring = Vec::new();
        wiring.extend(self.station_index.track(&self.station_buses));
        wiring.extend(self.evse_index.track(&self.evse_buses));

        // station and EVSE ids are unique across the whole operator
        wiring.push(self.station_index.guard_unique(&self.station_buses));
        wiring.push(self.evse_index.guard_unique(&self.evse_buses));

        let weak = Arc::downgrade(self);
        wiring.push(self.pools.buses().removal.on_notify(move |e| {
            if let Some(operator) = weak.upgrade() {
                operator.evict_pool(&e.entity);
            }
        }));
        let weak = Arc::downgrade(self);
        wiring.push(self.station_buses.removal.on_notify(move |e| {
            if let Some(operator) = weak.upgrade() {
                operator.evict_station(&e.entity);
            }
        }));
        let weak = Arc::downgrade(self);
        wiring.push(self.evse_buses.removal.on_notify(move |e| {
            if let Some(operator) = weak.upgrade() {
                operator.evict_evse(&e.entity);
            }
        }));

        // a tariff still referenced by a tariff group cannot go
        let weak = Arc::downgrade(self);
        wiring.push(self.tariffs.buses().removal.on_vote(move |e| {
            weak.upgrade().map_or(true, |operator| {
                operator
                    .tariff_groups
                    .entities()
                    .iter()
                    .all(|group| !group.contains(e.entity.id()))
            })
        }));

        self.wiring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(wiring);
    }

    fn evict_pool(&self, pool: &Arc<ChargingPool>) {
        for station in pool.stations() {
            self.station_index.remove_entity(&station);
            self.evict_station(&station);
        }
        debug!(operator_id = %self.id, pool_id = %pool.id(), "Pool evicted");
    }

    fn evict_station(&self, station: &Arc<ChargingStation>) {
        for evse in station.evses() {
            self.evse_index.remove_entity(&evse);
            self.evict_evse(&evse);
        }
        for group in self.station_groups.entities() {
            group.remove(station.id());
        }
    }

    fn evict_evse(&self, evse: &Arc<Evse>) {
        for group in self.evse_groups.entities() {
            group.remove(evse.id());
        }
    }

    pub fn settings(&self) -> &OperatorSettings {
        &self.settings
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    // ── Pools ──────────────────────────────────────────────────

    pub fn create_pool(
        self: &Arc<Self>,
        id: ChargingPoolId,
        draft: NodeDraft,
        ctx: &EventContext,
    ) -> CommandResult<ChargingPool> {
        let pool = ChargingPool::new(id, Arc::downgrade(self), draft, &self.settings, &self.events);
        self.pools.add_with(
            pool,
            |pool| {
                let mut wiring = pool.station_buses().forward_to(&self.station_buses);
                wiring.extend(pool.evse_buses().forward_to(&self.evse_buses));
                wiring
            },
            ctx,
        )
    }

    pub fn remove_pool(&self, id: &ChargingPoolId, ctx: &EventContext) -> CommandResult<ChargingPool> {
        self.pools.remove(id, ctx)
    }

    pub fn try_remove_pool(&self, id: &ChargingPoolId, ctx: &EventContext) -> Option<Arc<ChargingPool>> {
        self.pools.try_remove(id, ctx)
    }

    pub fn pool(&self, id: &ChargingPoolId) -> Option<Arc<ChargingPool>> {
        self.pools.try_get(id)
    }

    pub fn contains_pool(&self, id: &ChargingPoolId) -> bool {
        self.pools.contains_id(id)
    }

    /// Pools in creation order
    pub fn pools(&self) -> Vec<Arc<ChargingPool>> {
        self.pools.entities()
    }

    pub fn pool_ids(&self) -> Vec<ChargingPoolId> {
        self.pools.ids()
    }

    pub fn pool_buses(&self) -> &RegistryBuses<OperatorId, ChargingPool> {
        self.pools.buses()
    }

    // ── Stations and EVSEs (indexed) ───────────────────────────

    pub fn station(&self, id: &ChargingStationId) -> Option<Arc<ChargingStation>> {
        self.station_index.get(id)
    }

    pub fn contains_station(&self, id: &ChargingStationId) -> bool {
        self.station_index.contains(id)
    }

    /// All stations, ordered by id
    pub fn stations(&self) -> Vec<Arc<ChargingStation>> {
        let mut stations = self.station_index.entities();
        stations.sort_by(|a, b| a.id().cmp(b.id()));
        stations
    }

    pub fn station_ids(&self) -> Vec<ChargingStationId> {
        self.station_index.ids()
    }

    pub fn station_buses(&self) -> &RegistryBuses<ChargingPoolId, ChargingStation> {
        &self.station_buses
    }

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.evse_index.get(id)
    }

    pub fn contains_evse(&self, id: &EvseId) -> bool {
        self.evse_index.contains(id)
    }

    /// All EVSEs, ordered by id
    pub fn evses(&self) -> Vec<Arc<Evse>> {
        let mut evses = self.evse_index.entities();
        evses.sort_by(|a, b| a.id().cmp(b.id()));
        evses
    }

    pub fn evse_ids(&self) -> Vec<EvseId> {
        self.evse_index.ids()
    }

    pub fn evse_buses(&self) -> &RegistryBuses<ChargingStationId, Evse> {
        &self.evse_buses
    }

    // ── Aggregate status ───────────────────────────────────────

    pub fn pool_admin_statuses(&self) -> Vec<StatusReport<ChargingPoolId, AdminStatus>> {
        admin_status_report(&self.pools())
    }

    pub fn pool_statuses(&self) -> Vec<StatusReport<ChargingPoolId, OperationalStatus>> {
        status_report(&self.pools())
    }

    pub fn station_admin_statuses(&self) -> Vec<StatusReport<ChargingStationId, AdminStatus>> {
        admin_status_report(&self.stations())
    }

    pub fn station_statuses(&self) -> Vec<StatusReport<ChargingStationId, OperationalStatus>> {
        status_report(&self.stations())
    }

    pub fn evse_admin_statuses(&self) -> Vec<StatusReport<EvseId, AdminStatus>> {
        admin_status_report(&self.evses())
    }

    pub fn evse_statuses(&self) -> Vec<StatusReport<EvseId, OperationalStatus>> {
        status_report(&self.evses())
    }

    /// Status history window of one EVSE, newest first
    pub fn evse_status_history(
        &self,
        id: &EvseId,
        skip: usize,
        take: Option<usize>,
    ) -> Option<Vec<Timestamped<OperationalStatus>>> {
        self.evse(id)
            .map(|evse| evse.status().history_filtered(|_| true, |_| true, skip, take))
    }

    pub fn evse_admin_status_history(
        &self,
        id: &EvseId,
        skip: usize,
        take: Option<usize>,
    ) -> Option<Vec<Timestamped<AdminStatus>>> {
        self.evse(id)
            .map(|evse| evse.admin_status().history_filtered(|_| true, |_| true, skip, take))
    }

    // ── Tariffs ────────────────────────────────────────────────

    pub fn add_tariff(&self, tariff: ChargingTariff, ctx: &EventContext) -> CommandResult<ChargingTariff> {
        self.tariffs.add(tariff, ctx)
    }

    pub fn tariff(&self, id: &ChargingTariffId) -> Option<Arc<ChargingTariff>> {
        self.tariffs.try_get(id)
    }

    pub fn tariffs(&self) -> Vec<Arc<ChargingTariff>> {
        self.tariffs.entities()
    }

    /// Swap in `tariff` if the registered one is still `expected`.
    pub fn update_tariff(
        &self,
        tariff: ChargingTariff,
        expected: &Arc<ChargingTariff>,
        ctx: &EventContext,
    ) -> CommandResult<ChargingTariff> {
        let id = tariff.id().clone();
        self.tariffs.update_with(&id, tariff, expected, |_| Vec::new(), ctx)
    }

    pub fn try_update_tariff(
        &self,
        tariff: ChargingTariff,
        expected: &Arc<ChargingTariff>,
        ctx: &EventContext,
    ) -> bool {
        let id = tariff.id().clone();
        self.tariffs.try_update(&id, tariff, expected, ctx)
    }

    pub fn remove_tariff(&self, id: &ChargingTariffId, ctx: &EventContext) -> CommandResult<ChargingTariff> {
        self.tariffs.remove(id, ctx)
    }

    pub fn tariff_buses(&self) -> &RegistryBuses<OperatorId, ChargingTariff> {
        self.tariffs.buses()
    }

    // ── Groups ─────────────────────────────────────────────────

    pub fn create_tariff_group(
        &self,
        id: ChargingTariffGroupId,
        name: I18nString,
        ctx: &EventContext,
    ) -> CommandResult<ChargingTariffGroup> {
        self.tariff_groups.add(Group::new(id, name), ctx)
    }

    pub fn remove_tariff_group(
        &self,
        id: &ChargingTariffGroupId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingTariffGroup> {
        self.tariff_groups.remove(id, ctx)
    }

    pub fn tariff_group(&self, id: &ChargingTariffGroupId) -> Option<Arc<ChargingTariffGroup>> {
        self.tariff_groups.try_get(id)
    }

    pub fn tariff_groups(&self) -> Vec<Arc<ChargingTariffGroup>> {
        self.tariff_groups.entities()
    }

    pub fn add_tariff_to_group(
        &self,
        group_id: &ChargingTariffGroupId,
        tariff_id: ChargingTariffId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingTariffGroup> {
        let exists = self.tariffs.contains_id(&tariff_id);
        add_member(&self.tariff_groups, group_id, tariff_id, exists, EntityKind::ChargingTariff, ctx)
    }

    pub fn remove_tariff_from_group(
        &self,
        group_id: &ChargingTariffGroupId,
        tariff_id: &ChargingTariffId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingTariffGroup> {
        remove_member(&self.tariff_groups, group_id, tariff_id, ctx)
    }

    pub fn create_station_group(
        &self,
        id: ChargingStationGroupId,
        name: I18nString,
        ctx: &EventContext,
    ) -> CommandResult<ChargingStationGroup> {
        self.station_groups.add(Group::new(id, name), ctx)
    }

    pub fn remove_station_group(
        &self,
        id: &ChargingStationGroupId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingStationGroup> {
        self.station_groups.remove(id, ctx)
    }

    pub fn station_group(&self, id: &ChargingStationGroupId) -> Option<Arc<ChargingStationGroup>> {
        self.station_groups.try_get(id)
    }

    pub fn station_groups(&self) -> Vec<Arc<ChargingStationGroup>> {
        self.station_groups.entities()
    }

    pub fn add_station_to_group(
        &self,
        group_id: &ChargingStationGroupId,
        station_id: ChargingStationId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingStationGroup> {
        let exists = self.contains_station(&station_id);
        add_member(&self.station_groups, group_id, station_id, exists, EntityKind::ChargingStation, ctx)
    }

    pub fn remove_station_from_group(
        &self,
        group_id: &ChargingStationGroupId,
        station_id: &ChargingStationId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingStationGroup> {
        remove_member(&self.station_groups, group_id, station_id, ctx)
    }

    pub fn create_evse_group(
        &self,
        id: EvseGroupId,
        name: I18nString,
        ctx: &EventContext,
    ) -> CommandResult<EvseGroup> {
        self.evse_groups.add(Group::new(id, name), ctx)
    }

    pub fn remove_evse_group(&self, id: &EvseGroupId, ctx: &EventContext) -> CommandResult<EvseGroup> {
        self.evse_groups.remove(id, ctx)
    }

    pub fn evse_group(&self, id: &EvseGroupId) -> Option<Arc<EvseGroup>> {
        self.evse_groups.try_get(id)
    }

    pub fn evse_groups(&self) -> Vec<Arc<EvseGroup>> {
        self.evse_groups.entities()
    }

    pub fn add_evse_to_group(
        &self,
        group_id: &EvseGroupId,
        evse_id: EvseId,
        ctx: &EventContext,
    ) -> CommandResult<EvseGroup> {
        let exists = self.contains_evse(&evse_id);
        add_member(&self.evse_groups, group_id, evse_id, exists, EntityKind::Evse, ctx)
    }

    pub fn remove_evse_from_group(
        &self,
        group_id: &EvseGroupId,
        evse_id: &EvseId,
        ctx: &EventContext,
    ) -> CommandResult<EvseGroup> {
        remove_member(&self.evse_groups, group_id, evse_id, ctx)
    }

    // ── Collaborators ──────────────────────────────────────────

    pub fn remote_delegate(&self) -> Option<Arc<dyn RemoteChargingDelegate>> {
        self.remote.get()
    }

    pub fn set_remote_delegate(&self, delegate: Option<Arc<dyn RemoteChargingDelegate>>) {
        self.remote.set(delegate)
    }

    pub fn roaming_network(&self) -> Option<Arc<dyn RoamingNetwork>> {
        self.roaming
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_roaming_network(&self, network: Option<Arc<dyn RoamingNetwork>>) {
        *self.roaming.write().unwrap_or_else(|e| e.into_inner()) = network;
    }

    // ── Commands ───────────────────────────────────────────────

    pub async fn reserve(&self, request: ReserveRequest, cmd: &CommandContext) -> DispatchResult<Reservation> {
        self.dispatcher.reserve(self, request, cmd).await
    }

    pub async fn cancel_reservation(
        &self,
        request: CancelReservationRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<Reservation> {
        self.dispatcher.cancel_reservation(self, request, cmd).await
    }

    pub async fn remote_start(
        &self,
        request: RemoteStartRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<ChargingSession> {
        self.dispatcher.remote_start(self, request, cmd).await
    }

    pub async fn remote_stop(
        &self,
        request: RemoteStopRequest,
        cmd: &CommandContext,
    ) -> DispatchResult<ChargingSession> {
        self.dispatcher.remote_stop(self, request, cmd).await
    }

    pub async fn authorize_start(
        &self,
        auth_token: AuthToken,
        location: Option<ChargingLocation>,
        cmd: &CommandContext,
    ) -> DispatchResult<AuthorizationInfo> {
        let request = AuthorizeStartRequest {
            operator_id: self.id.clone(),
            auth_token,
            location,
            product: None,
            session_id: None,
        };
        self.dispatcher.authorize_start(self, request, cmd).await
    }

    pub async fn authorize_stop(
        &self,
        session_id: ChargingSessionId,
        auth_token: AuthToken,
        location: Option<ChargingLocation>,
        cmd: &CommandContext,
    ) -> DispatchResult<AuthorizationInfo> {
        let request = AuthorizeStopRequest {
            operator_id: self.id.clone(),
            session_id,
            auth_token,
            location,
        };
        self.dispatcher.authorize_stop(self, request, cmd).await
    }

    /// Reservations created through this operator and not yet cancelled
    pub fn reservations(&self) -> Vec<Reservation> {
        self.dispatcher.reservations()
    }

    pub fn reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.dispatcher.reservation(id)
    }

    /// Sessions started through this operator and not yet stopped
    pub fn charging_sessions(&self) -> Vec<ChargingSession> {
        self.dispatcher.sessions()
    }

    pub fn charging_session(&self, id: &ChargingSessionId) -> Option<ChargingSession> {
        self.dispatcher.session(id)
    }

    pub fn snapshot(&self) -> OperatorSnapshot {
        OperatorSnapshot {
            id: self.id.clone(),
            name: self.name(),
            description: self.description(),
            status: NodeStatusView::from(&self.node),
            pool_ids: self.pool_ids(),
            tariff_ids: self.tariffs.ids(),
            tariff_group_ids: self.tariff_groups.ids(),
            station_group_ids: self.station_groups.ids(),
            evse_group_ids: self.evse_groups.ids(),
        }
    }
}

node_accessors!(ChargingStationOperator);

impl Identifiable for ChargingStationOperator {
    type Id = OperatorId;
    const KIND: EntityKind = EntityKind::Operator;

    fn id(&self) -> &OperatorId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorSnapshot {
    pub id: OperatorId,
    pub name: I18nString,
    pub description: I18nString,
    #[serde(flatten)]
    pub status: NodeStatusView,
    pub pool_ids: Vec<ChargingPoolId>,
    pub tariff_ids: Vec<ChargingTariffId>,
    pub tariff_group_ids: Vec<ChargingTariffGroupId>,
    pub station_group_ids: Vec<ChargingStationGroupId>,
    pub evse_group_ids: Vec<EvseGroupId>,
}

fn add_member<G, M>(
    groups: &EntityRegistry<OperatorId, Group<G, M>>,
    group_id: &G,
    member: M,
    member_exists: bool,
    member_kind: EntityKind,
    ctx: &EventContext,
) -> CommandResult<Group<G, M>>
where
    Group<G, M>: Identifiable<Id = G>,
    G: Clone + std::fmt::Display,
    M: Ord + Clone + std::fmt::Display,
{
    let Some(group) = groups.try_get(group_id) else {
        return CommandResult::error(
            RegistryError::NotFound {
                kind: <Group<G, M> as Identifiable>::KIND.name(),
                id: group_id.to_string(),
            },
            &ctx.event_tracking_id,
        );
    };
    if !member_exists {
        return CommandResult::error(
            RegistryError::NotFound {
                kind: member_kind.name(),
                id: member.to_string(),
            },
            &ctx.event_tracking_id,
        );
    }
    let label = member.to_string();
    if group.insert(member) {
        debug!(group_id = %group_id, member = %label, "Group member added");
        CommandResult::success(group, &ctx.event_tracking_id)
    } else {
        CommandResult::no_operation(
            Some(group),
            format!("'{}' is already a member of '{}'", label, group_id),
            &ctx.event_tracking_id,
        )
    }
}

fn remove_member<G, M>(
    groups: &EntityRegistry<OperatorId, Group<G, M>>,
    group_id: &G,
    member: &M,
    ctx: &EventContext,
) -> CommandResult<Group<G, M>>
where
    Group<G, M>: Identifiable<Id = G>,
    G: Clone + std::fmt::Display,
    M: Ord + Clone + std::fmt::Display,
{
    let Some(group) = groups.try_get(group_id) else {
        return CommandResult::error(
            RegistryError::NotFound {
                kind: <Group<G, M> as Identifiable>::KIND.name(),
                id: group_id.to_string(),
            },
            &ctx.event_tracking_id,
        );
    };
    if group.remove(member) {
        CommandResult::success(group, &ctx.event_tracking_id)
    } else {
        CommandResult::no_operation(
            Some(group),
            format!("'{}' is not a member of '{}'", member, group_id),
            &ctx.event_tracking_id,
        )
    }
}
