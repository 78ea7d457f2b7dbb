//! Flat id → entity lookup across a whole subtree
//!
//! Kept in sync from the notify phase of (bubbled) registry buses, so it may
//! briefly lag an addition but never outlives a removal notification.
//! Between the vote and the notify of an addition the id is held as a
//! claim, which makes ids unique across sibling registries.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::entity::Identifiable;
use super::registry::RegistryBuses;
use super::voting::Subscription;

pub struct SecondaryIndex<E: Identifiable> {
    entries: DashMap<E::Id, Arc<E>>,
    /// Additions that passed the vote but are not indexed yet. Held weakly:
    /// a vetoed addition drops its entity and the claim goes stale with it.
    claims: DashMap<E::Id, Weak<E>>,
}

impl<E: Identifiable> SecondaryIndex<E> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            claims: DashMap::new(),
        }
    }

    pub fn insert(&self, entity: &Arc<E>) {
        trace!(kind = E::KIND.name(), id = %entity.id(), "Indexed");
        self.entries.insert(entity.id().clone(), entity.clone());
        self.claims.remove_if(entity.id(), |_, claim| {
            claim.upgrade().map_or(true, |holder| Arc::ptr_eq(&holder, entity))
        });
    }

    fn held_by_other(&self, entity: &Arc<E>) -> bool {
        self.entries
            .get(entity.id())
            .map_or(false, |current| !Arc::ptr_eq(current.value(), entity))
    }

    /// Reserve `entity`'s id until it is indexed. Fails if another instance
    /// is indexed or holds a live claim on the same id.
    pub fn claim(&self, entity: &Arc<E>) -> bool {
        if self.held_by_other(entity) {
            return false;
        }
        let claimed = match self.claims.entry(entity.id().clone()) {
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(holder) if !Arc::ptr_eq(&holder, entity) => false,
                _ => {
                    slot.insert(Arc::downgrade(entity));
                    true
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(entity));
                true
            }
        };
        // an addition may have been indexed between the first check and the claim
        if claimed && self.held_by_other(entity) {
            self.claims
                .remove_if(entity.id(), |_, claim| claim.ptr_eq(&Arc::downgrade(entity)));
            return false;
        }
        claimed
    }

    /// Veto additions whose id is already indexed or claimed.
    pub fn guard_unique<O: 'static>(self: &Arc<Self>, buses: &RegistryBuses<O, E>) -> Subscription {
        let index: Weak<Self> = Arc::downgrade(self);
        buses
            .addition
            .on_vote(move |e| index.upgrade().map_or(true, |index| index.claim(&e.entity)))
    }

    /// Evict `entity`, unless its slot already holds a different instance.
    pub fn remove_entity(&self, entity: &Arc<E>) -> bool {
        self.entries
            .remove_if(entity.id(), |_, current| Arc::ptr_eq(current, entity))
            .is_some()
    }

    pub fn remove(&self, id: &E::Id) -> Option<Arc<E>> {
        self.entries.remove(id).map(|(_, entity)| entity)
    }

    pub fn get(&self, id: &E::Id) -> Option<Arc<E>> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<E::Id> {
        let mut ids: Vec<E::Id> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn entities(&self) -> Vec<Arc<E>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Follow the notify phase of `buses`. The index is held weakly.
    pub fn track<O: 'static>(self: &Arc<Self>, buses: &RegistryBuses<O, E>) -> Vec<Subscription> {
        let on_add: Weak<Self> = Arc::downgrade(self);
        let on_update = on_add.clone();
        let on_remove = on_add.clone();
        vec![
            buses.addition.on_notify(move |e| {
                if let Some(index) = on_add.upgrade() {
                    index.insert(&e.entity);
                }
            }),
            buses.update.on_notify(move |e| {
                if let Some(index) = on_update.upgrade() {
                    index.insert(&e.entity);
                }
            }),
            buses.removal.on_notify(move |e| {
                if let Some(index) = on_remove.upgrade() {
                    index.remove_entity(&e.entity);
                }
            }),
        ]
    }
}

impl<E: Identifiable> Default for SecondaryIndex<E> {
    fn default() -> Self {
        Self::new()
    }
}
