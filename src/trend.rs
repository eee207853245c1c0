//! Daily completed/missed counts over a fixed lookback window.
//!
//! Recomputed from a full scan of the retained events every cycle. No history
//! is kept between cycles.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::types::{CompletedEvent, MissedEvent, TrendPoint};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// One point per day, oldest first, ending at `today`. Quiet days are zeros.
pub fn activity_trend(
    missed: &[MissedEvent],
    completed: &[CompletedEvent],
    today: NaiveDate,
    lookback_days: u32,
) -> Vec<TrendPoint> {
    if lookback_days == 0 {
        return Vec::new();
    }

    let start = today - Duration::days(i64::from(lookback_days) - 1);
    let mut days: BTreeMap<NaiveDate, TrendPoint> = (0..i64::from(lookback_days))
        .map(|offset| {
            let date = start + Duration::days(offset);
            (
                date,
                TrendPoint {
                    date,
                    completed: 0,
                    missed: 0,
                },
            )
        })
        .collect();

    for day in completed.iter().filter_map(|e| parse_day(&e.date)) {
        if let Some(point) = days.get_mut(&day) {
            point.completed += 1;
        }
    }
    for day in missed.iter().filter_map(|e| parse_day(&e.date)) {
        if let Some(point) = days.get_mut(&day) {
            point.missed += 1;
        }
    }

    days.into_values().collect()
}
