//! Combine classified tasks and expanded events into dashboard figures.

use std::collections::HashMap;

use crate::classify::TaskBuckets;
use crate::events::ExpandedEvents;
use crate::scope::ScopedCollections;
use crate::types::{
    CompletedEvent, DerivedStats, MissedEvent, PerformanceRecord, StatusBucket, StatusCounts,
    StatusDistributionEntry, TaskStatus,
};

/// Length of the "recent" activity lists.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub stats: DerivedStats,
    pub status_counts: StatusCounts,
    pub status_distribution: Vec<StatusDistributionEntry>,
    pub performance: Vec<PerformanceRecord>,
    pub recent_missed: Vec<MissedEvent>,
    pub recent_completed: Vec<CompletedEvent>,
    pub all_missed: Vec<MissedEvent>,
    pub all_completed: Vec<CompletedEvent>,
}

pub fn aggregate(
    scoped: &ScopedCollections,
    buckets: &TaskBuckets<'_>,
    events: &ExpandedEvents,
) -> Aggregate {
    let status_counts = StatusCounts {
        completed: buckets.completed.len() + events.completed.len(),
        active: buckets.active.len(),
        waiting: buckets.waiting.len(),
        pending: buckets.pending.len(),
        missed: events.missed.len(),
    };

    let stats = DerivedStats {
        total_personnel: scoped.personnel.len(),
        total_tasks: scoped.tasks.len(),
        completed_tasks: status_counts.completed,
        pending_tasks: status_counts.active,
    };

    let all_missed = sorted_missed(&events.missed);
    let all_completed = sorted_completed(&events.completed);

    Aggregate {
        stats,
        status_distribution: status_distribution(&status_counts),
        status_counts,
        performance: performance_records(scoped, events),
        recent_missed: all_missed.iter().take(RECENT_LIMIT).cloned().collect(),
        recent_completed: all_completed.iter().take(RECENT_LIMIT).cloned().collect(),
        all_missed,
        all_completed,
    }
}

/// Chart series. Zero-valued buckets are left out, not drawn as zero.
pub fn status_distribution(counts: &StatusCounts) -> Vec<StatusDistributionEntry> {
    StatusBucket::ALL
        .iter()
        .filter_map(|bucket| {
            let value = counts.get(*bucket);
            (value > 0).then(|| StatusDistributionEntry {
                bucket: *bucket,
                label: bucket.label().to_string(),
                value,
            })
        })
        .collect()
}

/// One record per scoped personnel, in roster order, even at zero activity.
pub fn performance_records(
    scoped: &ScopedCollections,
    events: &ExpandedEvents,
) -> Vec<PerformanceRecord> {
    let mut records: Vec<PerformanceRecord> =
        scoped.personnel.values().map(PerformanceRecord::new).collect();
    let index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.personnel_id.clone(), i))
        .collect();

    let slot = |pid: Option<&str>| pid.and_then(|id| index.get(id).copied());

    for task in scoped.tasks.values() {
        let Some(i) = slot(task.personnel_id.as_deref()) else {
            continue;
        };
        match task.status {
            TaskStatus::Completed => records[i].completed += 1,
            TaskStatus::Pending
            | TaskStatus::Waiting
            | TaskStatus::Assigned
            | TaskStatus::Accepted => records[i].pending += 1,
            TaskStatus::Unknown => {}
        }
    }

    for event in &events.completed {
        if let Some(i) = slot(event.personnel_id.as_deref()) {
            records[i].completed += 1;
        }
    }

    for event in &events.missed {
        if let Some(i) = slot(event.personnel_id.as_deref()) {
            records[i].missed += 1;
        }
    }

    records
}

fn sorted_missed(events: &[MissedEvent]) -> Vec<MissedEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| b.missed_at.cmp(&a.missed_at));
    sorted
}

fn sorted_completed(events: &[CompletedEvent]) -> Vec<CompletedEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_tasks;
    use crate::types::{Personnel, Task, UNASSIGNED_LABEL};

    fn missed(id: &str, at: i64, pid: Option<&str>) -> MissedEvent {
        MissedEvent {
            id: id.to_string(),
            task_id: "T1".to_string(),
            task_name: "Clean".to_string(),
            task_description: String::new(),
            date: "2024-01-01".to_string(),
            time: id.to_string(),
            missed_at: at,
            personnel_id: pid.map(str::to_string),
            personnel_name: pid.unwrap_or(UNASSIGNED_LABEL).to_string(),
        }
    }

    fn completed(id: &str, at: i64, pid: Option<&str>) -> CompletedEvent {
        CompletedEvent {
            id: id.to_string(),
            task_id: "T1".to_string(),
            task_name: "Clean".to_string(),
            task_description: String::new(),
            date: "2024-01-01".to_string(),
            time: id.to_string(),
            completed_at: at,
            completed_by: None,
            completion_location: None,
            personnel_id: pid.map(str::to_string),
            personnel_name: pid.unwrap_or(UNASSIGNED_LABEL).to_string(),
        }
    }

    fn scoped(tasks: Vec<(&str, TaskStatus, Option<&str>)>) -> ScopedCollections {
        let personnel = ["P1", "P2"]
            .into_iter()
            .map(|id| {
                (
                    id.to_string(),
                    Personnel {
                        id: id.to_string(),
                        name: id.to_string(),
                        branch_id: None,
                    },
                )
            })
            .collect();
        let tasks = tasks
            .into_iter()
            .map(|(id, status, pid)| {
                (
                    id.to_string(),
                    Task {
                        id: id.to_string(),
                        name: id.to_string(),
                        description: None,
                        status,
                        personnel_id: pid.map(str::to_string),
                        created_at: 0,
                        completed_at: None,
                    },
                )
            })
            .collect();
        ScopedCollections {
            personnel,
            tasks,
            restricted: false,
        }
    }

    #[test]
    fn completed_total_adds_ledger_and_log() {
        let scoped = scoped(vec![("T1", TaskStatus::Completed, Some("P1"))]);
        let events = ExpandedEvents {
            completed: vec![completed("a", 1, Some("P1")), completed("b", 2, None)],
            ..Default::default()
        };
        let agg = aggregate(&scoped, &classify_tasks(&scoped.tasks), &events);
        assert_eq!(agg.stats.completed_tasks, 3);
        assert_eq!(agg.performance[0].completed, 2);
    }

    #[test]
    fn distribution_omits_zero_buckets() {
        let scoped = scoped(vec![
            ("T1", TaskStatus::Assigned, Some("P1")),
            ("T2", TaskStatus::Waiting, None),
        ]);
        let agg = aggregate(&scoped, &classify_tasks(&scoped.tasks), &ExpandedEvents::default());
        let buckets: Vec<StatusBucket> = agg.status_distribution.iter().map(|e| e.bucket).collect();
        assert_eq!(buckets, vec![StatusBucket::Active, StatusBucket::Waiting]);
        assert!(agg.status_distribution.iter().all(|e| e.value > 0));
        assert_eq!(agg.stats.pending_tasks, 1);
    }

    #[test]
    fn every_scoped_person_gets_a_record() {
        let scoped = scoped(vec![]);
        let agg = aggregate(&scoped, &classify_tasks(&scoped.tasks), &ExpandedEvents::default());
        assert_eq!(agg.performance.len(), 2);
        assert!(agg.performance.iter().all(|r| r.total_activity() == 0));
        assert_eq!(agg.stats.total_personnel, 2);
    }

    #[test]
    fn ledger_open_tasks_count_as_pending() {
        let scoped = scoped(vec![
            ("T1", TaskStatus::Pending, Some("P2")),
            ("T2", TaskStatus::Waiting, Some("P2")),
            ("T3", TaskStatus::Accepted, Some("P2")),
            ("T4", TaskStatus::Unknown, Some("P2")),
        ]);
        let events = ExpandedEvents {
            missed: vec![missed("m", 1, Some("P2"))],
            ..Default::default()
        };
        let agg = aggregate(&scoped, &classify_tasks(&scoped.tasks), &events);
        let p2 = &agg.performance[1];
        assert_eq!((p2.completed, p2.pending, p2.missed), (0, 3, 1));
    }

    #[test]
    fn recent_is_prefix_of_all_sorted_newest_first() {
        let scoped = scoped(vec![]);
        let events = ExpandedEvents {
            missed: (0..15)
                .map(|i| missed(&format!("m{:02}", i), (i * 7 % 15) as i64, Some("P1")))
                .collect(),
            ..Default::default()
        };
        let agg = aggregate(&scoped, &classify_tasks(&scoped.tasks), &events);
        assert_eq!(agg.all_missed.len(), 15);
        assert_eq!(agg.recent_missed.len(), RECENT_LIMIT);
        assert_eq!(&agg.all_missed[..RECENT_LIMIT], &agg.recent_missed[..]);
        assert!(agg
            .all_missed
            .windows(2)
            .all(|w| w[0].missed_at >= w[1].missed_at));
    }
}
