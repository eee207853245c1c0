use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

/// Epoch milliseconds.
pub type Timestamp = i64;

/// Label used wherever a personnel reference cannot be resolved.
pub const UNASSIGNED_LABEL: &str = "Unassigned";

// =============================================================================
// Source records
// =============================================================================

/// A member of staff, keyed by id in the `personnel` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personnel {
    /// Filled from the collection key during ingest.
    #[serde(default, deserialize_with = "de_null_default")]
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Waiting,
    Assigned,
    Accepted,
    Completed,
    /// Anything the ledger stores that we don't recognise. Lands in no bucket.
    #[default]
    #[serde(other)]
    Unknown,
}

/// A ledger task, keyed by id in the `tasks` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, deserialize_with = "de_null_default")]
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_null_default")]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personnel_id: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Timestamp,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Leaf payload of the company `missedTasks` tree.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedPayload {
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub missed_at: Timestamp,
}

/// Leaf payload of the company `completedTasks` tree.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub completed_at: Timestamp,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub completion_location: Option<GeoLocation>,
}

// =============================================================================
// Derived records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedEvent {
    /// `taskId-date-time`, unique by construction.
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_description: String,
    pub date: String,
    pub time: String,
    pub missed_at: Timestamp,
    pub personnel_id: Option<String>,
    pub personnel_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedEvent {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_description: String,
    pub date: String,
    pub time: String,
    pub completed_at: Timestamp,
    pub completed_by: Option<String>,
    pub completion_location: Option<GeoLocation>,
    pub personnel_id: Option<String>,
    pub personnel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub personnel_id: String,
    pub name: String,
    pub completed: u32,
    pub pending: u32,
    pub missed: u32,
}

impl PerformanceRecord {
    pub fn new(personnel: &Personnel) -> Self {
        Self {
            personnel_id: personnel.id.clone(),
            name: personnel.name.clone(),
            completed: 0,
            pending: 0,
            missed: 0,
        }
    }

    pub fn total_activity(&self) -> u32 {
        self.completed + self.pending + self.missed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStats {
    pub total_personnel: usize,
    pub total_tasks: usize,
    /// Ledger completions plus event-log completions. Not deduplicated.
    pub completed_tasks: usize,
    /// Active (assigned + accepted) ledger tasks.
    pub pending_tasks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBucket {
    Completed,
    Active,
    Waiting,
    Pending,
    Missed,
}

impl StatusBucket {
    pub const ALL: [StatusBucket; 5] = [
        StatusBucket::Completed,
        StatusBucket::Active,
        StatusBucket::Waiting,
        StatusBucket::Pending,
        StatusBucket::Missed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Active => "Active",
            Self::Waiting => "Waiting",
            Self::Pending => "Pending",
            Self::Missed => "Missed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub completed: usize,
    pub active: usize,
    pub waiting: usize,
    pub pending: usize,
    pub missed: usize,
}

impl StatusCounts {
    pub fn get(&self, bucket: StatusBucket) -> usize {
        match bucket {
            StatusBucket::Completed => self.completed,
            StatusBucket::Active => self.active,
            StatusBucket::Waiting => self.waiting,
            StatusBucket::Pending => self.pending,
            StatusBucket::Missed => self.missed,
        }
    }
}

/// One chart series entry. Only emitted for non-zero buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDistributionEntry {
    pub bucket: StatusBucket,
    pub label: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub personnel_id: Option<String>,
    pub personnel_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEntry {
    /// Composite id of the completed event.
    pub id: String,
    pub task_id: String,
    pub personnel_id: Option<String>,
    pub personnel_name: String,
    pub completed_at: Timestamp,
    pub location: GeoLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub completed: usize,
    pub missed: usize,
}

/// Everything the presentation layer reads. Replaced wholesale per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedState {
    pub stats: DerivedStats,
    pub status_counts: StatusCounts,
    pub status_distribution: Vec<StatusDistributionEntry>,
    pub personnel_performance: Vec<PerformanceRecord>,
    pub recent_missed: Vec<MissedEvent>,
    pub recent_completed: Vec<CompletedEvent>,
    pub all_missed: Vec<MissedEvent>,
    pub all_completed: Vec<CompletedEvent>,
    pub pending_tasks_view: Vec<ActiveTaskView>,
    pub worst_performers: Vec<PerformanceRecord>,
    pub top_active_personnel: Vec<PerformanceRecord>,
    pub best_performers: Vec<PerformanceRecord>,
    pub activity_trend: Vec<TrendPoint>,
    pub location_master: Vec<LocationEntry>,
    pub location_filtered: Vec<LocationEntry>,
}

impl DerivedState {
    /// True when there is nothing to show in any view.
    pub fn is_empty(&self) -> bool {
        self.stats == DerivedStats::default()
            && self.all_missed.is_empty()
            && self.all_completed.is_empty()
    }
}

// =============================================================================
// Timestamp decoding
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    fn into_millis<E: serde::de::Error>(self) -> Result<Timestamp, E> {
        match self {
            RawTimestamp::Int(v) => Ok(v),
            RawTimestamp::Float(v) => Ok(v as i64),
            RawTimestamp::Text(s) => parse_timestamp_text(&s)
                .ok_or_else(|| E::custom(format!("unrecognised timestamp '{}'", s))),
        }
    }
}

/// Parse RFC 3339 or a bare integer string into epoch millis.
pub fn parse_timestamp_text(value: &str) -> Option<Timestamp> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }
    trimmed.parse::<i64>().ok()
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawTimestamp>::deserialize(deserializer)? {
        Some(raw) => raw.into_millis(),
        None => Ok(0),
    }
}

/// An explicit `null` decodes like a missing key.
fn de_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(RawTimestamp::into_millis)
        .transpose()
}
