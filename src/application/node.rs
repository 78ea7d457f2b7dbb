//! State shared by every node of the charging hierarchy
//!
//! Pools, stations, EVSEs, parking places and the operators themselves each
//! own a [`NodeState`] (name, description, admin status, status) instead of
//! inheriting it; `node_accessors!` generates the uniform accessors.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use super::events::{EntityRef, SharedEventBus};
use super::ports::RemoteChargingDelegate;
use super::tracker::{StatusTracker, TrackedProperty, TrackedStatus};
use crate::domain::{AdminStatus, I18nString, OperationalStatus, DEFAULT_HISTORY_SIZE};

/// Initial values of a node about to be created
#[derive(Debug, Clone, Default)]
pub struct NodeDraft {
    pub name: I18nString,
    pub description: I18nString,
    pub admin_status: AdminStatus,
    pub status: OperationalStatus,
}

impl NodeDraft {
    pub fn named(language: &str, text: &str) -> Self {
        Self {
            name: I18nString::create(language, text),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, language: &str, text: &str) -> Self {
        self.description.set(language, text);
        self
    }

    pub fn with_admin_status(mut self, status: AdminStatus) -> Self {
        self.admin_status = status;
        self
    }

    pub fn with_status(mut self, status: OperationalStatus) -> Self {
        self.status = status;
        self
    }
}

pub struct NodeState {
    pub(crate) name: TrackedProperty<I18nString>,
    pub(crate) description: TrackedProperty<I18nString>,
    pub(crate) admin_status: StatusTracker<AdminStatus>,
    pub(crate) status: StatusTracker<OperationalStatus>,
}

impl NodeState {
    pub fn new(
        entity: EntityRef,
        draft: NodeDraft,
        history_size: usize,
        events: &SharedEventBus,
    ) -> Self {
        let history_size = if history_size == 0 {
            DEFAULT_HISTORY_SIZE
        } else {
            history_size
        };
        Self {
            name: TrackedProperty::new(entity.clone(), "name", draft.name, events.clone()),
            description: TrackedProperty::new(
                entity.clone(),
                "description",
                draft.description,
                events.clone(),
            ),
            admin_status: StatusTracker::new(
                entity.clone(),
                TrackedStatus::Admin,
                history_size,
                draft.admin_status,
                events.clone(),
            ),
            status: StatusTracker::new(
                entity,
                TrackedStatus::Operational,
                history_size,
                draft.status,
                events.clone(),
            ),
        }
    }
}

/// Current admin status and status of a node, as rendered in projections
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusView {
    pub admin_status: AdminStatus,
    pub status: OperationalStatus,
}

impl From<&NodeState> for NodeStatusView {
    fn from(node: &NodeState) -> Self {
        Self {
            admin_status: node.admin_status.current(),
            status: node.status.current(),
        }
    }
}

/// Optional remote delegate attached to an operator, pool or station
#[derive(Default)]
pub struct RemoteSlot {
    delegate: RwLock<Option<Arc<dyn RemoteChargingDelegate>>>,
}

impl RemoteSlot {
    pub fn get(&self) -> Option<Arc<dyn RemoteChargingDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set(&self, delegate: Option<Arc<dyn RemoteChargingDelegate>>) {
        *self.delegate.write().unwrap_or_else(|e| e.into_inner()) = delegate;
    }
}

/// Name/description/status accessors for a struct with a `node: NodeState`
/// field, plus the status capability traits.
macro_rules! node_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn name(&self) -> $crate::domain::I18nString {
                self.node.name.get()
            }

            pub fn set_name(
                &self,
                name: $crate::domain::I18nString,
                ctx: &$crate::domain::EventContext,
            ) -> bool {
                self.node.name.set(name, ctx)
            }

            pub fn description(&self) -> $crate::domain::I18nString {
                self.node.description.get()
            }

            pub fn set_description(
                &self,
                description: $crate::domain::I18nString,
                ctx: &$crate::domain::EventContext,
            ) -> bool {
                self.node.description.set(description, ctx)
            }

            pub fn admin_status(
                &self,
            ) -> &$crate::application::tracker::StatusTracker<$crate::domain::AdminStatus> {
                &self.node.admin_status
            }

            pub fn status(
                &self,
            ) -> &$crate::application::tracker::StatusTracker<$crate::domain::OperationalStatus>
            {
                &self.node.status
            }
        }

        impl $crate::application::entity::HasAdminStatusSchedule for $ty {
            fn admin_status(
                &self,
            ) -> &$crate::application::tracker::StatusTracker<$crate::domain::AdminStatus> {
                &self.node.admin_status
            }
        }

        impl $crate::application::entity::HasStatusSchedule for $ty {
            type Status = $crate::domain::OperationalStatus;

            fn status(
                &self,
            ) -> &$crate::application::tracker::StatusTracker<$crate::domain::OperationalStatus>
            {
                &self.node.status
            }
        }
    };
}

pub(crate) use node_accessors;
