//! One pure pass from raw snapshots to `DerivedState`.
//!
//! Nothing here touches the store or the clock. Same inputs, same output.

use chrono::NaiveDate;

use crate::aggregate::aggregate;
use crate::classify::{active_tasks_view, classify_tasks};
use crate::events::expand_events;
use crate::ingest::{Collections, RawSnapshots};
use crate::location::{build_location_master, filter_locations, LocationFilter};
use crate::rank::rank;
use crate::scope::{apply_scope, ScopeContext};
use crate::trend::{activity_trend, DEFAULT_LOOKBACK_DAYS};
use crate::types::DerivedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecomputeOptions {
    /// Last day of the trend window.
    pub today: NaiveDate,
    pub trend_lookback_days: u32,
}

impl RecomputeOptions {
    pub fn for_day(today: NaiveDate) -> Self {
        Self {
            today,
            trend_lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

pub fn recompute(
    snapshots: &RawSnapshots,
    scope: &ScopeContext,
    filter: &LocationFilter,
    options: &RecomputeOptions,
) -> DerivedState {
    let collections = Collections::decode(snapshots);
    let scoped = apply_scope(&collections.personnel, &collections.tasks, scope);

    let buckets = classify_tasks(&scoped.tasks);
    let pending_tasks_view = active_tasks_view(&buckets, &scoped.personnel);
    let events = expand_events(&collections.company, &scoped, &collections.personnel);

    let agg = aggregate(&scoped, &buckets, &events);
    let rankings = rank(&agg.performance);
    let activity_trend = activity_trend(
        &agg.all_missed,
        &agg.all_completed,
        options.today,
        options.trend_lookback_days,
    );

    let location_master = build_location_master(&agg.all_completed);
    let location_filtered = filter_locations(&location_master, filter);

    DerivedState {
        stats: agg.stats,
        status_counts: agg.status_counts,
        status_distribution: agg.status_distribution,
        personnel_performance: agg.performance,
        recent_missed: agg.recent_missed,
        recent_completed: agg.recent_completed,
        all_missed: agg.all_missed,
        all_completed: agg.all_completed,
        pending_tasks_view,
        worst_performers: rankings.worst,
        top_active_personnel: rankings.top_active,
        best_performers: rankings.best,
        activity_trend,
        location_master,
        location_filtered,
    }
}

/// Re-derive only the filtered location subset.
pub fn refilter(state: &DerivedState, filter: &LocationFilter) -> DerivedState {
    DerivedState {
        location_filtered: filter_locations(&state.location_master, filter),
        ..state.clone()
    }
}
