//! Electric vehicle supply equipment, the leaf of the hierarchy

use std::sync::{Arc, Weak};

use serde::Serialize;

use super::station::ChargingStation;
use crate::application::entity::Identifiable;
use crate::application::events::{EntityKind, EntityRef, SharedEventBus};
use crate::application::node::{node_accessors, NodeDraft, NodeState, NodeStatusView};
use crate::application::tracker::TrackedProperty;
use crate::domain::{ChargingStationId, EventContext, EvseId, I18nString};

pub struct Evse {
    id: EvseId,
    station: Weak<ChargingStation>,
    node: NodeState,
    max_power_kw: TrackedProperty<Option<f64>>,
}

impl Evse {
    pub(super) fn new(
        id: EvseId,
        station: Weak<ChargingStation>,
        draft: NodeDraft,
        history_size: usize,
        events: &SharedEventBus,
    ) -> Self {
        let entity = EntityRef::new(EntityKind::Evse, &id);
        Self {
            node: NodeState::new(entity.clone(), draft, history_size, events),
            max_power_kw: TrackedProperty::new(entity, "max_power_kw", None, events.clone()),
            station,
            id,
        }
    }

    /// Owning station, unless it has been dropped
    pub fn station(&self) -> Option<Arc<ChargingStation>> {
        self.station.upgrade()
    }

    pub fn station_id(&self) -> Option<ChargingStationId> {
        self.station().map(|s| s.id().clone())
    }

    pub fn max_power_kw(&self) -> Option<f64> {
        self.max_power_kw.get()
    }

    pub fn set_max_power_kw(&self, power: Option<f64>, ctx: &EventContext) -> bool {
        self.max_power_kw.set(power, ctx)
    }

    pub fn snapshot(&self) -> EvseSnapshot {
        EvseSnapshot {
            id: self.id.clone(),
            station_id: self.station_id(),
            name: self.name(),
            description: self.description(),
            max_power_kw: self.max_power_kw(),
            status: NodeStatusView::from(&self.node),
        }
    }
}

node_accessors!(Evse);

impl Identifiable for Evse {
    type Id = EvseId;
    const KIND: EntityKind = EntityKind::Evse;

    fn id(&self) -> &EvseId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvseSnapshot {
    pub id: EvseId,
    pub station_id: Option<ChargingStationId>,
    pub name: I18nString,
    pub description: I18nString,
    pub max_power_kw: Option<f64>,
    #[serde(flatten)]
    pub status: NodeStatusView,
}
