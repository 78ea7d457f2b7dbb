//! Flat, non-hierarchical groupings of tariffs, stations and EVSEs

use std::collections::BTreeSet;
use std::sync::RwLock;

use serde::Serialize;

use crate::application::entity::Identifiable;
use crate::application::events::EntityKind;
use crate::domain::{
    ChargingStationGroupId, ChargingStationId, ChargingTariffGroupId, ChargingTariffId,
    EvseGroupId, EvseId, I18nString,
};

/// A named set of member ids. Membership has its own lock.
pub struct Group<G, M> {
    id: G,
    name: I18nString,
    members: RwLock<BTreeSet<M>>,
}

pub type ChargingTariffGroup = Group<ChargingTariffGroupId, ChargingTariffId>;
pub type ChargingStationGroup = Group<ChargingStationGroupId, ChargingStationId>;
pub type EvseGroup = Group<EvseGroupId, EvseId>;

impl<G: Clone, M: Ord + Clone> Group<G, M> {
    pub fn new(id: G, name: I18nString) -> Self {
        Self {
            id,
            name,
            members: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn name(&self) -> &I18nString {
        &self.name
    }

    pub fn contains(&self, member: &M) -> bool {
        self.members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(member)
    }

    /// Members in id order
    pub fn members(&self) -> Vec<M> {
        self.members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns false if already a member
    pub(super) fn insert(&self, member: M) -> bool {
        self.members
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(member)
    }

    pub(super) fn remove(&self, member: &M) -> bool {
        self.members
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(member)
    }

    pub fn snapshot(&self) -> GroupSnapshot<G, M> {
        GroupSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            members: self.members(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot<G, M> {
    pub id: G,
    pub name: I18nString,
    pub members: Vec<M>,
}

impl Identifiable for ChargingTariffGroup {
    type Id = ChargingTariffGroupId;
    const KIND: EntityKind = EntityKind::ChargingTariffGroup;

    fn id(&self) -> &ChargingTariffGroupId {
        &self.id
    }
}

impl Identifiable for ChargingStationGroup {
    type Id = ChargingStationGroupId;
    const KIND: EntityKind = EntityKind::ChargingStationGroup;

    fn id(&self) -> &ChargingStationGroupId {
        &self.id
    }
}

impl Identifiable for EvseGroup {
    type Id = EvseGroupId;
    const KIND: EntityKind = EntityKind::EvseGroup;

    fn id(&self) -> &EvseGroupId {
        &self.id
    }
}
