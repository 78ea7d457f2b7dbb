//! Per-entity status schedules and observable properties
//!
//! Every entity owns its trackers; each tracker has its own lock so frequent
//! status ticks never contend with registry mutations or command dispatch.

use std::fmt::Display;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use super::events::{DataChangedEvent, EntityRef, Event, SharedEventBus, StatusChangedEvent};
use crate::domain::{ChangeMethod, EventContext, InsertOutcome, StatusSchedule, Timestamped};

/// Which of the two schedules a tracker feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedStatus {
    Admin,
    Operational,
}

/// A [`StatusSchedule`] bound to one entity, publishing
/// `AdminStatusChanged` / `StatusChanged` whenever the current value changes.
pub struct StatusTracker<T> {
    entity: EntityRef,
    kind: TrackedStatus,
    schedule: RwLock<StatusSchedule<T>>,
    events: SharedEventBus,
}

impl<T> StatusTracker<T>
where
    T: Clone + PartialEq + Display + Send + Sync,
{
    pub fn new(
        entity: EntityRef,
        kind: TrackedStatus,
        max_size: usize,
        default: T,
        events: SharedEventBus,
    ) -> Self {
        Self {
            entity,
            kind,
            schedule: RwLock::new(StatusSchedule::new(max_size, default)),
            events,
        }
    }

    pub fn current(&self) -> T {
        self.schedule.read().unwrap_or_else(|e| e.into_inner()).current()
    }

    pub fn current_entry(&self) -> Option<Timestamped<T>> {
        self.schedule
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .current_entry()
            .cloned()
    }

    /// Record `value` as of now. Always accepted: if the clock has not moved
    /// past the newest entry the timestamp is nudged forward.
    pub fn set(&self, value: T, ctx: &EventContext) -> bool {
        let (old, new, timestamp) = {
            let mut schedule = self.schedule.write().unwrap_or_else(|e| e.into_inner());
            let mut timestamp = Utc::now();
            if let Some(head) = schedule.current_entry() {
                if head.timestamp >= timestamp {
                    timestamp = head.timestamp + Duration::microseconds(1);
                }
            }
            let old = schedule.current();
            schedule.insert(timestamp, value, ChangeMethod::Append);
            (old, schedule.current(), timestamp)
        };
        self.publish_if_changed(timestamp, old, new, ctx)
    }

    /// Record `value` as of `timestamp` using the given change method.
    pub fn set_at(
        &self,
        timestamp: DateTime<Utc>,
        value: T,
        method: ChangeMethod,
        ctx: &EventContext,
    ) -> InsertOutcome {
        let (outcome, old, new) = {
            let mut schedule = self.schedule.write().unwrap_or_else(|e| e.into_inner());
            let old = schedule.current();
            let outcome = schedule.insert(timestamp, value, method);
            (outcome, old, schedule.current())
        };
        if outcome.accepted() {
            self.publish_if_changed(timestamp, old, new, ctx);
        }
        outcome
    }

    fn publish_if_changed(
        &self,
        timestamp: DateTime<Utc>,
        old: T,
        new: T,
        ctx: &EventContext,
    ) -> bool {
        // an empty schedule reports its default, so that counts as the old value
        if old == new {
            return false;
        }
        debug!(
            entity = %self.entity.id,
            kind = ?self.kind,
            new = %new,
            "Status changed"
        );
        let event = StatusChangedEvent {
            timestamp,
            event_tracking_id: ctx.event_tracking_id.clone(),
            entity: self.entity.clone(),
            new_value: new.to_string(),
            old_value: Some(old.to_string()),
            data_source: ctx.data_source.clone(),
        };
        self.events.publish(match self.kind {
            TrackedStatus::Admin => Event::AdminStatusChanged(event),
            TrackedStatus::Operational => Event::StatusChanged(event),
        });
        true
    }

    pub fn history(&self) -> Vec<Timestamped<T>> {
        self.schedule.read().unwrap_or_else(|e| e.into_inner()).history()
    }

    pub fn history_filtered(
        &self,
        timestamp_filter: impl Fn(&DateTime<Utc>) -> bool,
        value_filter: impl Fn(&T) -> bool,
        skip: usize,
        take: Option<usize>,
    ) -> Vec<Timestamped<T>> {
        self.schedule
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .history_filtered(timestamp_filter, value_filter, skip, take)
    }
}

/// A plain entity property publishing `DataChanged` on every change.
pub struct TrackedProperty<T> {
    entity: EntityRef,
    name: &'static str,
    value: RwLock<T>,
    events: SharedEventBus,
}

impl<T> TrackedProperty<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync,
{
    pub fn new(entity: EntityRef, name: &'static str, value: T, events: SharedEventBus) -> Self {
        Self {
            entity,
            name,
            value: RwLock::new(value),
            events,
        }
    }

    pub fn get(&self) -> T {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns false (and publishes nothing) when the value is unchanged.
    pub fn set(&self, value: T, ctx: &EventContext) -> bool {
        let old = {
            let mut current = self.value.write().unwrap_or_else(|e| e.into_inner());
            if *current == value {
                return false;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        self.events.publish(Event::DataChanged(DataChangedEvent {
            timestamp: Utc::now(),
            event_tracking_id: ctx.event_tracking_id.clone(),
            user_id: ctx.user_id.clone(),
            entity: self.entity.clone(),
            property_name: self.name.to_string(),
            new_value: serde_json::to_value(&value).unwrap_or_default(),
            old_value: serde_json::to_value(&old).ok(),
            data_source: ctx.data_source.clone(),
        }));
        true
    }
}

// ── Tests ──────────────────────────────────────────────────────
