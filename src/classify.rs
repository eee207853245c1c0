//! Status buckets over the scoped ledger.

use std::collections::BTreeMap;

use crate::types::{ActiveTaskView, Personnel, StatusBucket, Task, TaskStatus, UNASSIGNED_LABEL};

/// Which bucket a ledger status belongs to. Unknown statuses belong nowhere.
pub fn bucket_for(status: TaskStatus) -> Option<StatusBucket> {
    match status {
        TaskStatus::Completed => Some(StatusBucket::Completed),
        TaskStatus::Accepted | TaskStatus::Assigned => Some(StatusBucket::Active),
        TaskStatus::Waiting => Some(StatusBucket::Waiting),
        TaskStatus::Pending => Some(StatusBucket::Pending),
        TaskStatus::Unknown => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskBuckets<'a> {
    pub completed: Vec<&'a Task>,
    pub active: Vec<&'a Task>,
    pub waiting: Vec<&'a Task>,
    pub pending: Vec<&'a Task>,
}

pub fn classify_tasks(tasks: &BTreeMap<String, Task>) -> TaskBuckets<'_> {
    let mut buckets = TaskBuckets::default();
    for task in tasks.values() {
        match bucket_for(task.status) {
            Some(StatusBucket::Completed) => buckets.completed.push(task),
            Some(StatusBucket::Active) => buckets.active.push(task),
            Some(StatusBucket::Waiting) => buckets.waiting.push(task),
            Some(StatusBucket::Pending) => buckets.pending.push(task),
            Some(StatusBucket::Missed) | None => {}
        }
    }
    buckets
}

/// Materialize the active bucket for the "pending tasks" table.
pub fn active_tasks_view(
    buckets: &TaskBuckets<'_>,
    personnel: &BTreeMap<String, Personnel>,
) -> Vec<ActiveTaskView> {
    buckets
        .active
        .iter()
        .map(|task| {
            let personnel_name = task
                .personnel_id
                .as_deref()
                .and_then(|pid| personnel.get(pid))
                .map(|p| p.name.clone())
                .unwrap_or_else(|| UNASSIGNED_LABEL.to_string());
            ActiveTaskView {
                id: task.id.clone(),
                name: task.name.clone(),
                description: task.description.clone(),
                status: task.status,
                personnel_id: task.personnel_id.clone(),
                personnel_name,
            }
        })
        .collect()
}
