//! Generic keyed entity collection
//!
//! Every owner/child pair (pools of an operator, EVSEs of a station, tariffs
//! of an operator, ...) is an [`EntityRegistry`]. Mutations run in three
//! steps:
//!
//! ```text
//!   reserve key  (under the registry lock; concurrent mutators of the
//!                 same key are turned away here)
//!   vote         (outside the lock; any veto aborts with no side effect)
//!   apply        (under the lock) ──► notify (outside the lock)
//! ```
//!
//! Holding the key reservation across the vote is what makes two concurrent
//! `add`s of the same key yield exactly one success.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entity::Identifiable;
use super::voting::{Subscription, VotingBus};
use crate::domain::{CommandResult, EventContext, RegistryError};

/// How `add` treats an id that is already registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddMode {
    /// Duplicate add is an `Error` (`AlreadyExists`)
    Strict,
    /// Duplicate add is a `NoOperation` returning the existing entity
    #[default]
    Idempotent,
}

/// Payload of every registry vote/notify.
///
/// `old_entity` is only set for updates.
pub struct RegistryEvent<O, E> {
    pub timestamp: DateTime<Utc>,
    pub owner: O,
    pub entity: Arc<E>,
    pub old_entity: Option<Arc<E>>,
    pub context: EventContext,
}

impl<O: Clone, E> Clone for RegistryEvent<O, E> {
    fn clone(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            owner: self.owner.clone(),
            entity: self.entity.clone(),
            old_entity: self.old_entity.clone(),
            context: self.context.clone(),
        }
    }
}

/// The addition/update/removal buses of one registry (or the bubbled
/// equivalents an ancestor exposes).
pub struct RegistryBuses<O, E> {
    pub addition: VotingBus<RegistryEvent<O, E>>,
    pub update: VotingBus<RegistryEvent<O, E>>,
    pub removal: VotingBus<RegistryEvent<O, E>>,
}

impl<O: 'static, E: 'static> RegistryBuses<O, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            addition: VotingBus::new(name),
            update: VotingBus::new(name),
            removal: VotingBus::new(name),
        }
    }

    /// Bubble all three buses into `target`.
    pub fn forward_to(&self, target: &RegistryBuses<O, E>) -> Vec<Subscription> {
        let mut wiring = self.addition.forward_to(&target.addition);
        wiring.extend(self.update.forward_to(&target.update));
        wiring.extend(self.removal.forward_to(&target.removal));
        wiring
    }
}

impl<O, E> Clone for RegistryBuses<O, E> {
    fn clone(&self) -> Self {
        Self {
            addition: self.addition.clone(),
            update: self.update.clone(),
            removal: self.removal.clone(),
        }
    }
}

struct Entry<E> {
    entity: Arc<E>,
    seq: u64,
    wiring: Vec<Subscription>,
}

struct State<K, E> {
    entries: HashMap<K, Entry<E>>,
    order: BTreeMap<u64, K>,
    pending: HashSet<K>,
    next_seq: u64,
}

pub struct EntityRegistry<O, E: Identifiable> {
    owner: O,
    mode: AddMode,
    state: Mutex<State<E::Id, E>>,
    buses: RegistryBuses<O, E>,
}

impl<O, E> EntityRegistry<O, E>
where
    O: Clone + Send + Sync + 'static,
    E: Identifiable,
{
    pub fn new(owner: O, mode: AddMode) -> Self {
        Self {
            owner,
            mode,
            state: Mutex::new(State {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                pending: HashSet::new(),
                next_seq: 0,
            }),
            buses: RegistryBuses::new(E::KIND.name()),
        }
    }

    pub fn owner(&self) -> &O {
        &self.owner
    }

    pub fn mode(&self) -> AddMode {
        self.mode
    }

    pub fn buses(&self) -> &RegistryBuses<O, E> {
        &self.buses
    }

    fn lock(&self) -> MutexGuard<'_, State<E::Id, E>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn event(&self, entity: Arc<E>, old_entity: Option<Arc<E>>, ctx: &EventContext) -> RegistryEvent<O, E> {
        RegistryEvent {
            timestamp: Utc::now(),
            owner: self.owner.clone(),
            entity,
            old_entity,
            context: ctx.clone(),
        }
    }

    fn release(&self, id: &E::Id) {
        self.lock().pending.remove(id);
    }

    /// Run the wiring callback; the reserved key is released if it panics.
    fn connect(
        &self,
        id: &E::Id,
        entity: &Arc<E>,
        on_connect: impl FnOnce(&Arc<E>) -> Vec<Subscription>,
    ) -> Vec<Subscription> {
        match panic::catch_unwind(AssertUnwindSafe(|| on_connect(entity))) {
            Ok(wiring) => wiring,
            Err(payload) => {
                self.release(id);
                warn!(kind = E::KIND.name(), id = %id, "Wiring callback panicked, key released");
                panic::resume_unwind(payload)
            }
        }
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn try_get(&self, id: &E::Id) -> Option<Arc<E>> {
        self.lock().entries.get(id).map(|e| e.entity.clone())
    }

    pub fn contains_id(&self, id: &E::Id) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// All entities in insertion order
    pub fn entities(&self) -> Vec<Arc<E>> {
        let state = self.lock();
        state
            .order
            .values()
            .filter_map(|id| state.entries.get(id).map(|e| e.entity.clone()))
            .collect()
    }

    /// All ids in insertion order
    pub fn ids(&self) -> Vec<E::Id> {
        self.lock().order.values().cloned().collect()
    }

    // ── Add ────────────────────────────────────────────────────

    pub fn add(&self, entity: impl Into<Arc<E>>, ctx: &EventContext) -> CommandResult<E> {
        self.add_with(entity, |_| Vec::new(), ctx)
    }

    /// Add and, once the vote passed, let `on_connect` wire the new entity's
    /// own buses into the owner. The returned subscriptions are dropped when
    /// the entity leaves the registry.
    pub fn add_with(
        &self,
        entity: impl Into<Arc<E>>,
        on_connect: impl FnOnce(&Arc<E>) -> Vec<Subscription>,
        ctx: &EventContext,
    ) -> CommandResult<E> {
        self.insert(entity.into(), on_connect, false, ctx)
    }

    /// Add, or replace the entity already registered under the same id.
    pub fn add_or_update(&self, entity: impl Into<Arc<E>>, ctx: &EventContext) -> CommandResult<E> {
        self.insert(entity.into(), |_| Vec::new(), true, ctx)
    }

    pub fn add_or_update_with(
        &self,
        entity: impl Into<Arc<E>>,
        on_connect: impl FnOnce(&Arc<E>) -> Vec<Subscription>,
        ctx: &EventContext,
    ) -> CommandResult<E> {
        self.insert(entity.into(), on_connect, true, ctx)
    }

    fn duplicate(&self, existing: Option<Arc<E>>, id: &E::Id, ctx: &EventContext) -> CommandResult<E> {
        match self.mode {
            AddMode::Idempotent => CommandResult::no_operation(
                existing,
                format!("{} '{}' already exists", E::KIND.name(), id),
                &ctx.event_tracking_id,
            ),
            AddMode::Strict => CommandResult::error(
                RegistryError::AlreadyExists {
                    kind: E::KIND.name(),
                    id: id.to_string(),
                },
                &ctx.event_tracking_id,
            ),
        }
    }

    fn insert(
        &self,
        entity: Arc<E>,
        on_connect: impl FnOnce(&Arc<E>) -> Vec<Subscription>,
        allow_update: bool,
        ctx: &EventContext,
    ) -> CommandResult<E> {
        let id = entity.id().clone();

        let old = {
            let mut state = self.lock();
            if state.pending.contains(&id) {
                drop(state);
                return self.duplicate(None, &id, ctx);
            }
            let old = state.entries.get(&id).map(|e| e.entity.clone());
            if let Some(existing) = &old {
                if !allow_update {
                    let existing = existing.clone();
                    drop(state);
                    return self.duplicate(Some(existing), &id, ctx);
                }
            }
            state.pending.insert(id.clone());
            old
        };

        let is_update = old.is_some();
        let bus = if is_update {
            &self.buses.update
        } else {
            &self.buses.addition
        };
        let event = self.event(entity.clone(), old, ctx);

        if !bus.vote(&event) {
            self.release(&id);
            debug!(kind = E::KIND.name(), id = %id, "Addition vetoed");
            return CommandResult::error(
                RegistryError::VetoRejected {
                    kind: E::KIND.name(),
                    id: id.to_string(),
                },
                &ctx.event_tracking_id,
            );
        }

        let wiring = self.connect(&id, &entity, on_connect);

        let replaced = {
            let mut state = self.lock();
            state.pending.remove(&id);
            let seq = match state.entries.get(&id) {
                Some(existing) => existing.seq,
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.order.insert(seq, id.clone());
                    seq
                }
            };
            state.entries.insert(
                id.clone(),
                Entry {
                    entity: entity.clone(),
                    seq,
                    wiring,
                },
            )
        };
        drop(replaced);

        debug!(
            kind = E::KIND.name(),
            id = %id,
            update = is_update,
            "Entity registered"
        );
        bus.notify(&event);
        CommandResult::success(entity, &ctx.event_tracking_id)
    }

    // ── Update ─────────────────────────────────────────────────

    /// Compare-and-swap: replace the entity at `id` only if it is still
    /// exactly `expected_old`.
    pub fn try_update(
        &self,
        id: &E::Id,
        new_entity: impl Into<Arc<E>>,
        expected_old: &Arc<E>,
        ctx: &EventContext,
    ) -> bool {
        self.update_inner(id, new_entity.into(), expected_old, |_| Vec::new(), ctx)
            .is_ok()
    }

    /// Like [`try_update`](Self::try_update) with a typed result and fresh
    /// wiring for the new entity.
    pub fn update_with(
        &self,
        id: &E::Id,
        new_entity: impl Into<Arc<E>>,
        expected_old: &Arc<E>,
        on_connect: impl FnOnce(&Arc<E>) -> Vec<Subscription>,
        ctx: &EventContext,
    ) -> CommandResult<E> {
        match self.update_inner(id, new_entity.into(), expected_old, on_connect, ctx) {
            Ok(entity) => CommandResult::success(entity, &ctx.event_tracking_id),
            Err(err) => CommandResult::error(err, &ctx.event_tracking_id),
        }
    }

    fn update_inner(
        &self,
        id: &E::Id,
        new_entity: Arc<E>,
        expected_old: &Arc<E>,
        on_connect: impl FnOnce(&Arc<E>) -> Vec<Subscription>,
        ctx: &EventContext,
    ) -> Result<Arc<E>, RegistryError> {
        let kind = E::KIND.name();
        if new_entity.id() != id {
            return Err(RegistryError::Argument(format!(
                "{} id '{}' does not match key '{}'",
                kind,
                new_entity.id(),
                id
            )));
        }

        {
            let mut state = self.lock();
            if state.pending.contains(id) {
                return Err(RegistryError::ConcurrentModification {
                    kind,
                    id: id.to_string(),
                });
            }
            match state.entries.get(id) {
                None => {
                    return Err(RegistryError::NotFound {
                        kind,
                        id: id.to_string(),
                    })
                }
                Some(entry) if !Arc::ptr_eq(&entry.entity, expected_old) => {
                    return Err(RegistryError::ConcurrentModification {
                        kind,
                        id: id.to_string(),
                    })
                }
                Some(_) => {}
            }
            state.pending.insert(id.clone());
        }

        let event = self.event(new_entity.clone(), Some(expected_old.clone()), ctx);
        if !self.buses.update.vote(&event) {
            self.release(id);
            return Err(RegistryError::VetoRejected {
                kind,
                id: id.to_string(),
            });
        }

        let wiring = self.connect(id, &new_entity, on_connect);
        let old_wiring = {
            let mut state = self.lock();
            state.pending.remove(id);
            match state.entries.get_mut(id) {
                Some(entry) => {
                    entry.entity = new_entity.clone();
                    std::mem::replace(&mut entry.wiring, wiring)
                }
                None => Vec::new(),
            }
        };
        drop(old_wiring);

        self.buses.update.notify(&event);
        Ok(new_entity)
    }

    // ── Remove ─────────────────────────────────────────────────

    pub fn try_remove(&self, id: &E::Id, ctx: &EventContext) -> Option<Arc<E>> {
        self.remove_inner(id, ctx).ok()
    }

    pub fn remove(&self, id: &E::Id, ctx: &EventContext) -> CommandResult<E> {
        match self.remove_inner(id, ctx) {
            Ok(entity) => CommandResult::success(entity, &ctx.event_tracking_id),
            Err(err) => CommandResult::error(err, &ctx.event_tracking_id),
        }
    }

    fn remove_inner(&self, id: &E::Id, ctx: &EventContext) -> Result<Arc<E>, RegistryError> {
        let kind = E::KIND.name();
        let entity = {
            let mut state = self.lock();
            if state.pending.contains(id) {
                return Err(RegistryError::ConcurrentModification {
                    kind,
                    id: id.to_string(),
                });
            }
            let entity = match state.entries.get(id) {
                Some(entry) => entry.entity.clone(),
                None => {
                    return Err(RegistryError::NotFound {
                        kind,
                        id: id.to_string(),
                    })
                }
            };
            state.pending.insert(id.clone());
            entity
        };

        let event = self.event(entity.clone(), None, ctx);
        if !self.buses.removal.vote(&event) {
            self.release(id);
            debug!(kind, id = %id, "Removal vetoed");
            return Err(RegistryError::VetoRejected {
                kind,
                id: id.to_string(),
            });
        }

        let removed = {
            let mut state = self.lock();
            state.pending.remove(id);
            let removed = state.entries.remove(id);
            if let Some(entry) = &removed {
                state.order.remove(&entry.seq);
            }
            removed
        };
        match removed {
            Some(entry) => drop(entry.wiring),
            None => warn!(kind, id = %id, "Entry vanished while reserved"),
        }

        debug!(kind, id = %id, "Entity removed");
        self.buses.removal.notify(&event);
        Ok(entity)
    }
}

// ── Tests ──────────────────────────────────────────────────────
