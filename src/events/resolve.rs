//! Personnel resolution for event-log leaves.

use std::collections::BTreeMap;

use crate::types::{Personnel, Task};

/// Which reference wins when both an explicit actor and a task owner exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorPriority {
    /// Completed events: `completedBy`, then the task's `personnelId`.
    ExplicitFirst,
    /// Missed events carry no actor field.
    TaskOnly,
}

/// Pick the responsible personnel for an event.
///
/// The first present reference in priority order is the candidate; it only
/// resolves if that id exists in `personnel`. A present but dangling
/// `completedBy` does not fall through to the task owner.
pub fn resolve_personnel<'p>(
    task: Option<&Task>,
    explicit_actor: Option<&str>,
    priority: ActorPriority,
    personnel: &'p BTreeMap<String, Personnel>,
) -> Option<&'p Personnel> {
    let explicit = match priority {
        ActorPriority::ExplicitFirst => explicit_actor.filter(|id| !id.is_empty()),
        ActorPriority::TaskOnly => None,
    };
    let candidate = explicit.or_else(|| {
        task.and_then(|t| t.personnel_id.as_deref())
            .filter(|id| !id.is_empty())
    })?;
    personnel.get(candidate)
}
