//! Leaderboards derived from per-personnel tallies.
//!
//! Every sort here is stable, so ties keep roster order.

use crate::types::PerformanceRecord;

pub const WORST_LIMIT: usize = 10;
/// Chart list: most total activity.
pub const TOP_ACTIVE_LIMIT: usize = 5;
pub const BEST_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rankings {
    pub worst: Vec<PerformanceRecord>,
    pub top_active: Vec<PerformanceRecord>,
    pub best: Vec<PerformanceRecord>,
}

pub fn rank(performance: &[PerformanceRecord]) -> Rankings {
    let top_active = top_active(performance);
    Rankings {
        worst: worst_performers(performance),
        best: best_performers(&top_active),
        top_active,
    }
}

/// Anyone with a miss, most misses first.
pub fn worst_performers(performance: &[PerformanceRecord]) -> Vec<PerformanceRecord> {
    let mut worst: Vec<PerformanceRecord> =
        performance.iter().filter(|r| r.missed > 0).cloned().collect();
    worst.sort_by(|a, b| b.missed.cmp(&a.missed));
    worst.truncate(WORST_LIMIT);
    worst
}

/// Personnel with any completed or pending work, highest total activity first.
pub fn top_active(performance: &[PerformanceRecord]) -> Vec<PerformanceRecord> {
    let mut active: Vec<PerformanceRecord> = performance
        .iter()
        .filter(|r| r.completed + r.pending > 0)
        .cloned()
        .collect();
    active.sort_by(|a, b| b.total_activity().cmp(&a.total_activity()));
    active.truncate(TOP_ACTIVE_LIMIT);
    active
}

/// The leaderboard table: the top-active list re-sorted by completions.
pub fn best_performers(top_active: &[PerformanceRecord]) -> Vec<PerformanceRecord> {
    let mut best = top_active.to_vec();
    best.sort_by(|a, b| b.completed.cmp(&a.completed));
    best.truncate(BEST_LIMIT);
    best
}
