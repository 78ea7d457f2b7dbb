//! Capabilities shared by every entity kind

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::events::{EntityKind, EntityRef};
use super::tracker::StatusTracker;
use crate::domain::AdminStatus;

/// An entity with an immutable id, unique within its owner's registry.
pub trait Identifiable: Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Ord + fmt::Display + fmt::Debug + Send + Sync + 'static;

    const KIND: EntityKind;

    fn id(&self) -> &Self::Id;

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::KIND, self.id())
    }
}

pub trait HasAdminStatusSchedule {
    fn admin_status(&self) -> &StatusTracker<AdminStatus>;
}

pub trait HasStatusSchedule {
    type Status;

    fn status(&self) -> &StatusTracker<Self::Status>;
}

/// Current value of one entity's status schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport<I, T> {
    pub id: I,
    pub value: T,
    /// When the value was recorded; `None` while the schedule is empty
    pub since: Option<DateTime<Utc>>,
}

/// Admin status of each entity, ordered by id
pub fn admin_status_report<E>(entities: &[Arc<E>]) -> Vec<StatusReport<E::Id, AdminStatus>>
where
    E: Identifiable + HasAdminStatusSchedule,
{
    let mut report: Vec<_> = entities
        .iter()
        .map(|e| {
            let tracker = e.admin_status();
            StatusReport {
                id: e.id().clone(),
                since: tracker.current_entry().map(|entry| entry.timestamp),
                value: tracker.current(),
            }
        })
        .collect();
    report.sort_by(|a, b| a.id.cmp(&b.id));
    report
}

/// Status of each entity, ordered by id
pub fn status_report<E>(entities: &[Arc<E>]) -> Vec<StatusReport<E::Id, E::Status>>
where
    E: Identifiable + HasStatusSchedule,
    E::Status: Clone + PartialEq + fmt::Display + Send + Sync,
{
    let mut report: Vec<_> = entities
        .iter()
        .map(|e| {
            let tracker = e.status();
            StatusReport {
                id: e.id().clone(),
                since: tracker.current_entry().map(|entry| entry.timestamp),
                value: tracker.current(),
            }
        })
        .collect();
    report.sort_by(|a, b| a.id.cmp(&b.id));
    report
}
