//! Charging station: a cabinet owning one or more EVSEs

use std::sync::{Arc, Weak};

use serde::Serialize;

use super::evse::Evse;
use super::pool::ChargingPool;
use super::OperatorSettings;
use crate::application::entity::Identifiable;
use crate::application::events::{EntityKind, EntityRef, SharedEventBus};
use crate::application::node::{node_accessors, NodeDraft, NodeState, NodeStatusView, RemoteSlot};
use crate::application::ports::RemoteChargingDelegate;
use crate::application::registry::{EntityRegistry, RegistryBuses};
use crate::domain::{
    ChargingPoolId, ChargingStationId, CommandResult, EventContext, EvseId, I18nString,
};

pub struct ChargingStation {
    id: ChargingStationId,
    pool: Weak<ChargingPool>,
    node: NodeState,
    evses: EntityRegistry<ChargingStationId, Evse>,
    remote: RemoteSlot,
    history_size: usize,
    events: SharedEventBus,
}

impl ChargingStation {
    pub(super) fn new(
        id: ChargingStationId,
        pool: Weak<ChargingPool>,
        draft: NodeDraft,
        settings: &OperatorSettings,
        events: &SharedEventBus,
    ) -> Self {
        Self {
            node: NodeState::new(
                EntityRef::new(EntityKind::ChargingStation, &id),
                draft,
                settings.status_history_size,
                events,
            ),
            evses: EntityRegistry::new(id.clone(), settings.add_mode),
            remote: RemoteSlot::default(),
            history_size: settings.status_history_size,
            events: events.clone(),
            pool,
            id,
        }
    }

    pub fn pool(&self) -> Option<Arc<ChargingPool>> {
        self.pool.upgrade()
    }

    pub fn pool_id(&self) -> Option<ChargingPoolId> {
        self.pool().map(|p| p.id().clone())
    }

    // ── EVSEs ──────────────────────────────────────────────────

    pub fn create_evse(
        self: &Arc<Self>,
        id: EvseId,
        draft: NodeDraft,
        ctx: &EventContext,
    ) -> CommandResult<Evse> {
        let evse = Evse::new(id, Arc::downgrade(self), draft, self.history_size, &self.events);
        self.evses.add(evse, ctx)
    }

    pub fn remove_evse(&self, id: &EvseId, ctx: &EventContext) -> CommandResult<Evse> {
        self.evses.remove(id, ctx)
    }

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.evses.try_get(id)
    }

    pub fn contains_evse(&self, id: &EvseId) -> bool {
        self.evses.contains_id(id)
    }

    pub fn evses(&self) -> Vec<Arc<Evse>> {
        self.evses.entities()
    }

    pub fn evse_ids(&self) -> Vec<EvseId> {
        self.evses.ids()
    }

    pub fn evse_buses(&self) -> &RegistryBuses<ChargingStationId, Evse> {
        self.evses.buses()
    }

    // ── Remote delegate ────────────────────────────────────────

    pub fn remote_delegate(&self) -> Option<Arc<dyn RemoteChargingDelegate>> {
        self.remote.get()
    }

    pub fn set_remote_delegate(&self, delegate: Option<Arc<dyn RemoteChargingDelegate>>) {
        self.remote.set(delegate)
    }

    pub fn snapshot(&self) -> ChargingStationSnapshot {
        ChargingStationSnapshot {
            id: self.id.clone(),
            pool_id: self.pool_id(),
            name: self.name(),
            description: self.description(),
            status: NodeStatusView::from(&self.node),
            evse_ids: self.evse_ids(),
        }
    }
}

node_accessors!(ChargingStation);

impl Identifiable for ChargingStation {
    type Id = ChargingStationId;
    const KIND: EntityKind = EntityKind::ChargingStation;

    fn id(&self) -> &ChargingStationId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargingStationSnapshot {
    pub id: ChargingStationId,
    pub pool_id: Option<ChargingPoolId>,
    pub name: I18nString,
    pub description: I18nString,
    #[serde(flatten)]
    pub status: NodeStatusView,
    pub evse_ids: Vec<EvseId>,
}
