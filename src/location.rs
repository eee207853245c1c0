//! Map pipeline over geotagged completions.
//!
//! The master list is rebuilt with every full recompute. The filtered subset
//! is re-derived from it whenever the filter changes, without touching the
//! store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{CompletedEvent, LocationEntry};

pub const DEFAULT_MAX_COUNT: usize = 10;
pub const MAX_COUNT_CHOICES: [usize; 5] = [10, 20, 30, 50, 100];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFilter {
    max_count: usize,
    personnel_ids: BTreeSet<String>,
    task_ids: BTreeSet<String>,
}

impl Default for LocationFilter {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            personnel_ids: BTreeSet::new(),
            task_ids: BTreeSet::new(),
        }
    }
}

/// Partial filter change. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFilterUpdate {
    #[serde(default)]
    pub max_count: Option<usize>,
    #[serde(default)]
    pub personnel_ids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub task_ids: Option<BTreeSet<String>>,
}

impl LocationFilter {
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn personnel_ids(&self) -> &BTreeSet<String> {
        &self.personnel_ids
    }

    pub fn task_ids(&self) -> &BTreeSet<String> {
        &self.task_ids
    }

    /// Apply a change. An invalid count rejects the whole update.
    pub fn apply(&mut self, update: LocationFilterUpdate) -> Result<(), EngineError> {
        if let Some(count) = update.max_count {
            if !MAX_COUNT_CHOICES.contains(&count) {
                return Err(EngineError::InvalidMaxCount(count));
            }
            self.max_count = count;
        }
        if let Some(ids) = update.personnel_ids {
            self.personnel_ids = ids;
        }
        if let Some(ids) = update.task_ids {
            self.task_ids = ids;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Set predicates only; the count limit is applied separately.
    pub fn matches(&self, entry: &LocationEntry) -> bool {
        let personnel_ok = self.personnel_ids.is_empty()
            || entry
                .personnel_id
                .as_ref()
                .map(|pid| self.personnel_ids.contains(pid))
                .unwrap_or(false);
        let task_ok = self.task_ids.is_empty() || self.task_ids.contains(&entry.task_id);
        personnel_ok && task_ok
    }
}

/// Every geotagged completion, newest first.
pub fn build_location_master(completed: &[CompletedEvent]) -> Vec<LocationEntry> {
    let mut master: Vec<LocationEntry> = completed
        .iter()
        .filter_map(|event| {
            event.completion_location.map(|location| LocationEntry {
                id: event.id.clone(),
                task_id: event.task_id.clone(),
                personnel_id: event.personnel_id.clone(),
                personnel_name: event.personnel_name.clone(),
                completed_at: event.completed_at,
                location,
            })
        })
        .collect();
    master.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    master
}

/// Personnel filter, then task filter, then the count limit, in that order.
pub fn filter_locations(master: &[LocationEntry], filter: &LocationFilter) -> Vec<LocationEntry> {
    master
        .iter()
        .filter(|entry| filter.matches(entry))
        .take(filter.max_count)
        .cloned()
        .collect()
}
