//! Typed walk over the company event logs.
//!
//! Both logs share the shape `taskId → date → time → payload`. The tree keeps
//! that nesting in ordered maps and exposes the leaves as one flat, lazy
//! iterator so callers never repeat the triple loop.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ingest::{decode_one, json_kind};

type TimeSlots<P> = BTreeMap<String, P>;
type DateSlots<P> = BTreeMap<String, TimeSlots<P>>;

#[derive(Debug, Clone, PartialEq)]
pub struct EventTree<P> {
    nodes: BTreeMap<String, DateSlots<P>>,
}

impl<P> Default for EventTree<P> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

/// One `(taskId, date, time)` entry of an event log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leaf<'a, P> {
    pub task_id: &'a str,
    pub date: &'a str,
    pub time: &'a str,
    pub payload: &'a P,
}

impl<P> Leaf<'_, P> {
    pub fn composite_id(&self) -> String {
        format!("{}-{}-{}", self.task_id, self.date, self.time)
    }
}

impl<P> EventTree<P> {
    pub fn insert(&mut self, task_id: &str, date: &str, time: &str, payload: P) {
        self.nodes
            .entry(task_id.to_string())
            .or_default()
            .entry(date.to_string())
            .or_default()
            .insert(time.to_string(), payload);
    }

    /// Leaves in task, date, time key order.
    pub fn leaves(&self) -> impl Iterator<Item = Leaf<'_, P>> + '_ {
        self.nodes.iter().flat_map(|(task_id, dates)| {
            dates.iter().flat_map(move |(date, times)| {
                times.iter().map(move |(time, payload)| Leaf {
                    task_id: task_id.as_str(),
                    date: date.as_str(),
                    time: time.as_str(),
                    payload,
                })
            })
        })
    }

    pub fn len(&self) -> usize {
        self.leaves().count()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes
            .values()
            .all(|dates| dates.values().all(|times| times.is_empty()))
    }
}

impl<P: DeserializeOwned> EventTree<P> {
    /// Build a tree from a raw JSON sub-tree. Levels that aren't objects and
    /// leaves that fail to decode are skipped with a warning.
    pub fn from_value(value: Option<&Value>, label: &str) -> Self {
        let mut tree = Self::default();
        let Some(value) = value else {
            return tree;
        };

        let Some(tasks) = as_level(value, label, "root") else {
            return tree;
        };
        for (task_id, dates) in tasks {
            let Some(dates) = as_level(dates, label, task_id) else {
                continue;
            };
            for (date, times) in dates {
                let Some(times) = as_level(times, label, task_id) else {
                    continue;
                };
                for (time, payload) in times {
                    let key = format!("{}/{}/{}", task_id, date, time);
                    if let Some(payload) = decode_one::<P>(payload, label, &key) {
                        tree.insert(task_id, date, time, payload);
                    }
                }
            }
        }
        tree
    }
}

fn as_level<'a>(
    value: &'a Value,
    label: &str,
    at: &str,
) -> Option<&'a serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            log::warn!(
                "Ingest: {} entry under '{}' is a {}, expected object; skipping",
                label,
                at,
                json_kind(other)
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MissedPayload;
    use serde_json::json;

    #[test]
    fn leaves_walk_in_key_order() {
        let raw = json!({
            "T2": { "2024-01-01": { "09:00": { "missedAt": 3 } } },
            "T1": {
                "2024-01-02": { "10:00": { "missedAt": 2 } },
                "2024-01-01": {
                    "18:00": { "missedAt": 1 },
                    "09:00": { "missedAt": 0 },
                },
            },
        });
        let tree: EventTree<MissedPayload> = EventTree::from_value(Some(&raw), "missedTasks");

        let ids: Vec<String> = tree.leaves().map(|l| l.composite_id()).collect();
        assert_eq!(
            ids,
            vec![
                "T1-2024-01-01-09:00",
                "T1-2024-01-01-18:00",
                "T1-2024-01-02-10:00",
                "T2-2024-01-01-09:00",
            ]
        );
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn broken_levels_are_skipped() {
        let raw = json!({
            "T1": "oops",
            "T2": { "2024-01-01": 7 },
            "T3": { "2024-01-01": { "09:00": { "missedAt": "never" }, "10:00": {} } },
        });
        let tree: EventTree<MissedPayload> = EventTree::from_value(Some(&raw), "missedTasks");
        let leaves: Vec<_> = tree.leaves().collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].task_id, "T3");
        assert_eq!(leaves[0].time, "10:00");
    }

    #[test]
    fn missing_tree_is_empty() {
        let tree: EventTree<MissedPayload> = EventTree::from_value(None, "missedTasks");
        assert!(tree.is_empty());
        assert_eq!(tree.leaves().count(), 0);
    }
}
