//! Charging pool: a site grouping charging stations

use std::sync::{Arc, Weak};

use serde::Serialize;

use super::evse::Evse;
use super::station::ChargingStation;
use super::{ChargingStationOperator, OperatorSettings};
use crate::application::entity::Identifiable;
use crate::application::events::{EntityKind, EntityRef, SharedEventBus};
use crate::application::node::{node_accessors, NodeDraft, NodeState, NodeStatusView, RemoteSlot};
use crate::application::ports::RemoteChargingDelegate;
use crate::application::registry::{EntityRegistry, RegistryBuses};
use crate::domain::{
    ChargingPoolId, ChargingStationId, CommandResult, EventContext, EvseId, I18nString, OperatorId,
};

pub struct ChargingPool {
    id: ChargingPoolId,
    operator: Weak<ChargingStationOperator>,
    node: NodeState,
    stations: EntityRegistry<ChargingPoolId, ChargingStation>,
    /// EVSE registry events of all stations, bubbled
    evse_buses: RegistryBuses<ChargingStationId, Evse>,
    remote: RemoteSlot,
    settings: OperatorSettings,
    events: SharedEventBus,
}

impl ChargingPool {
    pub(super) fn new(
        id: ChargingPoolId,
        operator: Weak<ChargingStationOperator>,
        draft: NodeDraft,
        settings: &OperatorSettings,
        events: &SharedEventBus,
    ) -> Self {
        Self {
            node: NodeState::new(
                EntityRef::new(EntityKind::ChargingPool, &id),
                draft,
                settings.status_history_size,
                events,
            ),
            stations: EntityRegistry::new(id.clone(), settings.add_mode),
            evse_buses: RegistryBuses::new("pool evses"),
            remote: RemoteSlot::default(),
            settings: settings.clone(),
            events: events.clone(),
            operator,
            id,
        }
    }

    pub fn operator(&self) -> Option<Arc<ChargingStationOperator>> {
        self.operator.upgrade()
    }

    pub fn operator_id(&self) -> Option<OperatorId> {
        self.operator().map(|o| o.id().clone())
    }

    // ── Stations ───────────────────────────────────────────────

    pub fn create_station(
        self: &Arc<Self>,
        id: ChargingStationId,
        draft: NodeDraft,
        ctx: &EventContext,
    ) -> CommandResult<ChargingStation> {
        let station =
            ChargingStation::new(id, Arc::downgrade(self), draft, &self.settings, &self.events);
        self.stations.add_with(
            station,
            |station| station.evse_buses().forward_to(&self.evse_buses),
            ctx,
        )
    }

    pub fn remove_station(
        &self,
        id: &ChargingStationId,
        ctx: &EventContext,
    ) -> CommandResult<ChargingStation> {
        self.stations.remove(id, ctx)
    }

    pub fn station(&self, id: &ChargingStationId) -> Option<Arc<ChargingStation>> {
        self.stations.try_get(id)
    }

    pub fn contains_station(&self, id: &ChargingStationId) -> bool {
        self.stations.contains_id(id)
    }

    pub fn stations(&self) -> Vec<Arc<ChargingStation>> {
        self.stations.entities()
    }

    pub fn station_ids(&self) -> Vec<ChargingStationId> {
        self.stations.ids()
    }

    pub fn station_buses(&self) -> &RegistryBuses<ChargingPoolId, ChargingStation> {
        self.stations.buses()
    }

    // ── EVSEs (across all stations) ────────────────────────────

    pub fn evses(&self) -> Vec<Arc<Evse>> {
        self.stations().iter().flat_map(|s| s.evses()).collect()
    }

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.stations().iter().find_map(|s| s.evse(id))
    }

    pub fn evse_buses(&self) -> &RegistryBuses<ChargingStationId, Evse> {
        &self.evse_buses
    }

    // ── Remote delegate ────────────────────────────────────────

    pub fn remote_delegate(&self) -> Option<Arc<dyn RemoteChargingDelegate>> {
        self.remote.get()
    }

    pub fn set_remote_delegate(&self, delegate: Option<Arc<dyn RemoteChargingDelegate>>) {
        self.remote.set(delegate)
    }

    pub fn snapshot(&self) -> ChargingPoolSnapshot {
        ChargingPoolSnapshot {
            id: self.id.clone(),
            operator_id: self.operator_id(),
            name: self.name(),
            description: self.description(),
            status: NodeStatusView::from(&self.node),
            station_ids: self.station_ids(),
        }
    }
}

node_accessors!(ChargingPool);

impl Identifiable for ChargingPool {
    type Id = ChargingPoolId;
    const KIND: EntityKind = EntityKind::ChargingPool;

    fn id(&self) -> &ChargingPoolId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargingPoolSnapshot {
    pub id: ChargingPoolId,
    pub operator_id: Option<OperatorId>,
    pub name: I18nString,
    pub description: I18nString,
    #[serde(flatten)]
    pub status: NodeStatusView,
    pub station_ids: Vec<ChargingStationId>,
}
