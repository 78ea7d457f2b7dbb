//! Bounded, timestamped status history
//!
//! A [`StatusSchedule`] keeps the last `max_size` status values of one
//! entity, newest first. It is a sliding window, not an audit log: once
//! full, every accepted insert evicts the oldest entry.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::Timestamped;

/// Default number of retained entries
pub const DEFAULT_HISTORY_SIZE: usize = 15;

/// How an insert is merged into the existing history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChangeMethod {
    /// Accept only timestamps strictly newer than the current head
    #[default]
    Append,
    /// Merge older timestamps into their sorted position
    Insert,
    /// Drop the whole history and start over with this entry
    Replace,
}

/// What happened to an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Appended,
    Merged,
    Replaced,
    /// Out of order (Append) or exact timestamp already present
    Dropped,
}

impl InsertOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

#[derive(Debug, Clone)]
pub struct StatusSchedule<T> {
    // newest first
    entries: VecDeque<Timestamped<T>>,
    max_size: usize,
    default: T,
}

impl<T: Clone + PartialEq> StatusSchedule<T> {
    pub fn new(max_size: usize, default: T) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
            default,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent value, or the configured default when empty
    pub fn current(&self) -> T {
        self.entries
            .front()
            .map(|e| e.value.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn current_entry(&self) -> Option<&Timestamped<T>> {
        self.entries.front()
    }

    pub fn insert(&mut self, timestamp: DateTime<Utc>, value: T, method: ChangeMethod) -> InsertOutcome {
        match method {
            ChangeMethod::Replace => {
                self.entries.clear();
                self.entries.push_front(Timestamped::new(timestamp, value));
                InsertOutcome::Replaced
            }
            ChangeMethod::Append => match self.entries.front() {
                Some(head) if timestamp <= head.timestamp => InsertOutcome::Dropped,
                _ => {
                    self.entries.push_front(Timestamped::new(timestamp, value));
                    self.evict();
                    InsertOutcome::Appended
                }
            },
            ChangeMethod::Insert => {
                if self.entries.iter().any(|e| e.timestamp == timestamp) {
                    return InsertOutcome::Dropped;
                }
                let position = self
                    .entries
                    .iter()
                    .position(|e| e.timestamp < timestamp)
                    .unwrap_or(self.entries.len());
                if position >= self.max_size {
                    // older than everything the window keeps
                    return InsertOutcome::Dropped;
                }
                self.entries.insert(position, Timestamped::new(timestamp, value));
                self.evict();
                if position == 0 {
                    InsertOutcome::Appended
                } else {
                    InsertOutcome::Merged
                }
            }
        }
    }

    fn evict(&mut self) {
        while self.entries.len() > self.max_size {
            self.entries.pop_back();
        }
    }

    /// Full window, newest first
    pub fn history(&self) -> Vec<Timestamped<T>> {
        self.entries.iter().cloned().collect()
    }

    /// Filtered window, newest first. `take` defaults to the window size.
    pub fn history_filtered(
        &self,
        timestamp_filter: impl Fn(&DateTime<Utc>) -> bool,
        value_filter: impl Fn(&T) -> bool,
        skip: usize,
        take: Option<usize>,
    ) -> Vec<Timestamped<T>> {
        let mut seen: Vec<DateTime<Utc>> = Vec::new();
        self.entries
            .iter()
            .filter(|e| {
                if seen.contains(&e.timestamp) {
                    return false;
                }
                seen.push(e.timestamp);
                true
            })
            .filter(|e| timestamp_filter(&e.timestamp) && value_filter(&e.value))
            .skip(skip)
            .take(take.unwrap_or(self.max_size))
            .cloned()
            .collect()
    }
}

impl<T: Clone + PartialEq + Default> Default for StatusSchedule<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE, T::default())
    }
}

// ── Tests ──────────────────────────────────────────────────────
