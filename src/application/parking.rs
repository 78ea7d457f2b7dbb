//! Parking operator: an aggregate root over parking places
//!
//! Same registry, status and event machinery as the charging side, without
//! the charging hierarchy or command dispatch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::info;

use super::entity::{admin_status_report, status_report, Identifiable, StatusReport};
use super::events::{EntityKind, EntityRef, SharedEventBus};
use super::node::{node_accessors, NodeDraft, NodeState, NodeStatusView};
use super::operator::OperatorSettings;
use super::registry::{EntityRegistry, RegistryBuses};
use crate::domain::{
    AdminStatus, CommandResult, EventContext, I18nString, OperationalStatus, ParkingOperatorId,
    ParkingPlaceId,
};

pub struct ParkingPlace {
    id: ParkingPlaceId,
    operator: Weak<ParkingOperator>,
    node: NodeState,
    capacity: u32,
    occupied: AtomicU32,
}

impl ParkingPlace {
    pub fn operator(&self) -> Option<Arc<ParkingOperator>> {
        self.operator.upgrade()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn occupied(&self) -> u32 {
        self.occupied.load(Ordering::SeqCst)
    }

    pub fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied())
    }

    /// Record one more parked vehicle. Returns false when full.
    pub fn enter(&self, ctx: &EventContext) -> bool {
        let capacity = self.capacity;
        let entered = self
            .occupied
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok();
        if entered {
            self.refresh_status(ctx);
        }
        entered
    }

    /// Record one vehicle leaving. Returns false when already empty.
    pub fn leave(&self, ctx: &EventContext) -> bool {
        let left = self
            .occupied
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if left {
            self.refresh_status(ctx);
        }
        left
    }

    fn refresh_status(&self, ctx: &EventContext) {
        let status = if self.free() == 0 {
            OperationalStatus::Occupied
        } else {
            OperationalStatus::Available
        };
        if self.node.status.current() != status {
            self.node.status.set(status, ctx);
        }
    }

    pub fn snapshot(&self) -> ParkingPlaceSnapshot {
        ParkingPlaceSnapshot {
            id: self.id.clone(),
            name: self.name(),
            capacity: self.capacity,
            occupied: self.occupied(),
            status: NodeStatusView::from(&self.node),
        }
    }
}

node_accessors!(ParkingPlace);

impl Identifiable for ParkingPlace {
    type Id = ParkingPlaceId;
    const KIND: EntityKind = EntityKind::ParkingPlace;

    fn id(&self) -> &ParkingPlaceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParkingPlaceSnapshot {
    pub id: ParkingPlaceId,
    pub name: I18nString,
    pub capacity: u32,
    pub occupied: u32,
    #[serde(flatten)]
    pub status: NodeStatusView,
}

pub struct ParkingOperator {
    id: ParkingOperatorId,
    node: NodeState,
    settings: OperatorSettings,
    events: SharedEventBus,
    places: EntityRegistry<ParkingOperatorId, ParkingPlace>,
}

impl ParkingOperator {
    pub fn new(
        id: ParkingOperatorId,
        draft: NodeDraft,
        settings: OperatorSettings,
        events: SharedEventBus,
    ) -> Arc<Self> {
        let operator = Arc::new(Self {
            node: NodeState::new(
                EntityRef::new(EntityKind::ParkingOperator, &id),
                draft,
                settings.status_history_size,
                &events,
            ),
            places: EntityRegistry::new(id.clone(), settings.add_mode),
            settings,
            events,
            id,
        });
        info!(operator_id = %operator.id, "Parking operator created");
        operator
    }

    pub fn create_parking_place(
        self: &Arc<Self>,
        id: ParkingPlaceId,
        draft: NodeDraft,
        capacity: u32,
        ctx: &EventContext,
    ) -> CommandResult<ParkingPlace> {
        let place = ParkingPlace {
            node: NodeState::new(
                EntityRef::new(EntityKind::ParkingPlace, &id),
                draft,
                self.settings.status_history_size,
                &self.events,
            ),
            operator: Arc::downgrade(self),
            capacity,
            occupied: AtomicU32::new(0),
            id,
        };
        self.places.add(place, ctx)
    }

    pub fn remove_parking_place(
        &self,
        id: &ParkingPlaceId,
        ctx: &EventContext,
    ) -> CommandResult<ParkingPlace> {
        self.places.remove(id, ctx)
    }

    pub fn parking_place(&self, id: &ParkingPlaceId) -> Option<Arc<ParkingPlace>> {
        self.places.try_get(id)
    }

    pub fn contains_parking_place(&self, id: &ParkingPlaceId) -> bool {
        self.places.contains_id(id)
    }

    pub fn parking_places(&self) -> Vec<Arc<ParkingPlace>> {
        self.places.entities()
    }

    pub fn parking_place_buses(&self) -> &RegistryBuses<ParkingOperatorId, ParkingPlace> {
        self.places.buses()
    }

    pub fn parking_place_admin_statuses(&self) -> Vec<StatusReport<ParkingPlaceId, AdminStatus>> {
        admin_status_report(&self.parking_places())
    }

    pub fn parking_place_statuses(&self) -> Vec<StatusReport<ParkingPlaceId, OperationalStatus>> {
        status_report(&self.parking_places())
    }

    /// Free spaces across all operational places
    pub fn free_capacity(&self) -> u32 {
        self.parking_places()
            .iter()
            .filter(|p| p.admin_status().current().accepts_commands())
            .map(|p| p.free())
            .sum()
    }
}

node_accessors!(ParkingOperator);

impl Identifiable for ParkingOperator {
    type Id = ParkingOperatorId;
    const KIND: EntityKind = EntityKind::ParkingOperator;

    fn id(&self) -> &ParkingOperatorId {
        &self.id
    }
}
