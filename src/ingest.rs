//! Raw snapshot decoding.
//!
//! The store hands us whole-collection JSON mappings keyed by record id. This
//! module turns them into typed, key-ordered collections. Bad records are
//! skipped one at a time so a single malformed entry never blanks a view.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::events::tree::EventTree;
use crate::types::{CompletedPayload, MissedPayload, Personnel, Task};

/// A point-in-time collection value: record id → record.
pub type Snapshot = serde_json::Map<String, Value>;

/// Key inside `tasks` that holds a legacy missed log rather than a task.
pub const RESERVED_MISSED_KEY: &str = "missedTasks";

const COMPANY_MISSED_KEY: &str = "missedTasks";
const COMPANY_COMPLETED_KEY: &str = "completedTasks";

/// The three most recently fetched collection values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshots {
    pub personnel: Snapshot,
    pub tasks: Snapshot,
    pub company: Snapshot,
}

/// Coerce whatever the store delivered into a snapshot. Anything that isn't a
/// JSON object (absent path, null, scalar) is an empty mapping.
pub fn snapshot_from_value(value: Value) -> Snapshot {
    match value {
        Value::Object(map) => map,
        Value::Null => Snapshot::new(),
        other => {
            log::warn!(
                "Ingest: expected an object snapshot, got {}; treating as empty",
                json_kind(&other)
            );
            Snapshot::new()
        }
    }
}

/// Nested event logs from the company record.
#[derive(Debug, Clone, Default)]
pub struct CompanyLog {
    pub missed: EventTree<MissedPayload>,
    pub completed: EventTree<CompletedPayload>,
}

/// Typed view of all three snapshots.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub personnel: BTreeMap<String, Personnel>,
    pub tasks: BTreeMap<String, Task>,
    pub company: CompanyLog,
}

impl Collections {
    pub fn decode(raw: &RawSnapshots) -> Self {
        Self {
            personnel: decode_personnel(&raw.personnel),
            tasks: decode_tasks(&raw.tasks),
            company: decode_company(&raw.company),
        }
    }
}

pub fn decode_personnel(snapshot: &Snapshot) -> BTreeMap<String, Personnel> {
    decode_records(snapshot, "personnel", |id, person: &mut Personnel| {
        person.id = id.to_string();
    })
}

pub fn decode_tasks(snapshot: &Snapshot) -> BTreeMap<String, Task> {
    let mut tasks = BTreeMap::new();
    for (id, value) in snapshot {
        if id == RESERVED_MISSED_KEY {
            continue;
        }
        if let Some(mut task) = decode_one::<Task>(value, "tasks", id) {
            task.id = id.clone();
            tasks.insert(id.clone(), task);
        }
    }
    tasks
}

pub fn decode_company(snapshot: &Snapshot) -> CompanyLog {
    CompanyLog {
        missed: EventTree::from_value(snapshot.get(COMPANY_MISSED_KEY), COMPANY_MISSED_KEY),
        completed: EventTree::from_value(
            snapshot.get(COMPANY_COMPLETED_KEY),
            COMPANY_COMPLETED_KEY,
        ),
    }
}

fn decode_records<T, F>(snapshot: &Snapshot, collection: &str, assign_id: F) -> BTreeMap<String, T>
where
    T: DeserializeOwned,
    F: Fn(&str, &mut T),
{
    let mut out = BTreeMap::new();
    for (id, value) in snapshot {
        if let Some(mut record) = decode_one::<T>(value, collection, id) {
            assign_id(id, &mut record);
            out.insert(id.clone(), record);
        }
    }
    out
}

pub(crate) fn decode_one<T: DeserializeOwned>(value: &Value, collection: &str, key: &str) -> Option<T> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Ingest: skipping malformed {} record '{}': {}", collection, key, e);
            None
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        snapshot_from_value(value)
    }

    #[test]
    fn keys_become_record_ids() {
        let personnel = decode_personnel(&snapshot(json!({
            "P1": { "id": "ignored", "name": "Ali", "branchId": "B1" },
        })));
        assert_eq!(personnel["P1"].id, "P1");
        assert_eq!(personnel["P1"].branch_id.as_deref(), Some("B1"));
    }

    #[test]
    fn reserved_missed_key_is_not_a_task() {
        let tasks = decode_tasks(&snapshot(json!({
            "T1": { "name": "Clean", "status": "pending" },
            "missedTasks": { "T1": {} },
        })));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks["T1"].status, TaskStatus::Pending);
    }

    #[test]
    fn malformed_records_are_skipped_individually() {
        let tasks = decode_tasks(&snapshot(json!({
            "T1": { "name": "Clean" },
            "T2": "not a task",
            "T3": { "createdAt": "whenever" },
        })));
        assert_eq!(tasks.keys().collect::<Vec<_>>(), vec!["T1"]);
    }

    #[test]
    fn non_object_snapshots_are_empty() {
        assert!(snapshot_from_value(Value::Null).is_empty());
        assert!(snapshot_from_value(json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn company_without_logs_is_empty() {
        let log = decode_company(&snapshot(json!({ "name": "Acme" })));
        assert!(log.missed.is_empty());
        assert!(log.completed.is_empty());
    }

    #[test]
    fn explicit_nulls_decode_as_defaults() {
        let personnel = decode_personnel(&snapshot(json!({
            "P1": { "name": null, "branchId": null },
        })));
        assert_eq!(personnel["P1"].name, "");
        assert_eq!(personnel["P1"].branch_id, None);

        let tasks = decode_tasks(&snapshot(json!({
            "T1": { "name": null, "status": "completed" },
            "T2": { "name": "Count", "status": null, "createdAt": null },
        })));
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks["T1"].name, "");
        assert_eq!(tasks["T1"].status, TaskStatus::Completed);
        assert_eq!(tasks["T2"].status, TaskStatus::Unknown);
        assert_eq!(tasks["T2"].created_at, 0);
    }
}
