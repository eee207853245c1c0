//! Flatten the company event logs into normalized event records.

use std::collections::BTreeMap;

use crate::ingest::CompanyLog;
use crate::scope::ScopedCollections;
use crate::types::{CompletedEvent, MissedEvent, Personnel, Task, UNASSIGNED_LABEL};

use super::resolve::{resolve_personnel, ActorPriority};
use super::tree::Leaf;

/// Expander output, in tree order (not yet sorted by time).
#[derive(Debug, Clone, Default)]
pub struct ExpandedEvents {
    pub missed: Vec<MissedEvent>,
    pub completed: Vec<CompletedEvent>,
    /// Leaves excluded by scoping or unresolvable references.
    pub dropped: usize,
}

enum Placement<'p> {
    Assigned(&'p Personnel),
    Unassigned,
    Dropped,
}

impl Placement<'_> {
    fn into_parts(self) -> Option<(Option<String>, String)> {
        match self {
            Placement::Assigned(p) => Some((Some(p.id.clone()), p.name.clone())),
            Placement::Unassigned => Some((None, UNASSIGNED_LABEL.to_string())),
            Placement::Dropped => None,
        }
    }
}

/// Decide where a leaf goes once its personnel has (or hasn't) resolved.
///
/// Restricted scope drops anything it can't attribute to an in-branch person.
/// Unrestricted scope keeps unattributed leaves under the unassigned label.
fn place<'p>(resolved: Option<&'p Personnel>, scoped: &ScopedCollections) -> Placement<'p> {
    match resolved {
        Some(person) if scoped.contains_personnel(&person.id) => Placement::Assigned(person),
        Some(_) => Placement::Dropped,
        None if scoped.restricted => Placement::Dropped,
        None => Placement::Unassigned,
    }
}

fn leaf_text(own: Option<&String>, fallback: Option<&String>) -> String {
    own.or(fallback).cloned().unwrap_or_default()
}

fn owning_task<'a, P>(leaf: &Leaf<'_, P>, scoped: &'a ScopedCollections) -> Option<&'a Task> {
    scoped.tasks.get(leaf.task_id)
}

/// Walk both logs and emit one record per retained leaf.
///
/// `personnel` is the full roster; scoping is decided by `scoped`.
pub fn expand_events(
    log: &CompanyLog,
    scoped: &ScopedCollections,
    personnel: &BTreeMap<String, Personnel>,
) -> ExpandedEvents {
    let mut out = ExpandedEvents::default();
    if log.missed.is_empty() && log.completed.is_empty() {
        return out;
    }
    log::debug!(
        "Expander: walking {} missed / {} completed leaves",
        log.missed.len(),
        log.completed.len()
    );

    for leaf in log.missed.leaves() {
        let task = owning_task(&leaf, scoped);
        let resolved = resolve_personnel(task, None, ActorPriority::TaskOnly, personnel);
        let Some((personnel_id, personnel_name)) = place(resolved, scoped).into_parts() else {
            out.dropped += 1;
            continue;
        };
        out.missed.push(MissedEvent {
            id: leaf.composite_id(),
            task_id: leaf.task_id.to_string(),
            task_name: leaf_text(leaf.payload.task_name.as_ref(), task.map(|t| &t.name)),
            task_description: leaf_text(
                leaf.payload.task_description.as_ref(),
                task.and_then(|t| t.description.as_ref()),
            ),
            date: leaf.date.to_string(),
            time: leaf.time.to_string(),
            missed_at: leaf.payload.missed_at,
            personnel_id,
            personnel_name,
        });
    }

    for leaf in log.completed.leaves() {
        let task = owning_task(&leaf, scoped);
        let resolved = resolve_personnel(
            task,
            leaf.payload.completed_by.as_deref(),
            ActorPriority::ExplicitFirst,
            personnel,
        );
        let Some((personnel_id, personnel_name)) = place(resolved, scoped).into_parts() else {
            out.dropped += 1;
            continue;
        };
        out.completed.push(CompletedEvent {
            id: leaf.composite_id(),
            task_id: leaf.task_id.to_string(),
            task_name: leaf_text(leaf.payload.task_name.as_ref(), task.map(|t| &t.name)),
            task_description: leaf_text(
                leaf.payload.task_description.as_ref(),
                task.and_then(|t| t.description.as_ref()),
            ),
            date: leaf.date.to_string(),
            time: leaf.time.to_string(),
            completed_at: leaf.payload.completed_at,
            completed_by: leaf.payload.completed_by.clone(),
            completion_location: leaf.payload.completion_location,
            personnel_id,
            personnel_name,
        });
    }

    if out.dropped > 0 {
        log::debug!(
            "Expander: kept {} missed / {} completed, dropped {} out-of-scope or unresolvable",
            out.missed.len(),
            out.completed.len(),
            out.dropped
        );
    }

    out
}
