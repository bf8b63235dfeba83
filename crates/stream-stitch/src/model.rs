//! Canonical session models.
//!
//! A [`Stream`] is one streaming occurrence: the interval the local recorder
//! was live, plus zero or more [`PlatformStreamRecord`]s holding what each
//! external platform independently reported for the same occurrence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::Platform;

/// Canonical stream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Opaque unique id, caller-generated.
    pub common_id: String,
    /// Instant the local recording started.
    pub obs_start_time: DateTime<Utc>,
    /// Instant the local recording stopped; None while live or when the
    /// session was never locally observed.
    pub obs_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Stream {
    /// Create a new session starting at `obs_start_time`.
    pub fn new(common_id: impl Into<String>, obs_start_time: DateTime<Utc>) -> Self {
        Self {
            common_id: common_id.into(),
            obs_start_time,
            obs_end_time: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the session has no recorded end.
    pub fn is_live(&self) -> bool {
        self.obs_end_time.is_none()
    }

    /// The session's time span; open-ended while live.
    pub fn span(&self) -> TimeRange {
        TimeRange::new(self.obs_start_time, self.obs_end_time)
    }
}

/// One platform's reported view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformStreamData {
    pub platform: Platform,
    /// The platform's native identifier for this broadcast.
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Remaining platform payload, passed through untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl PlatformStreamData {
    /// The interval the platform reported; open-ended while the platform
    /// still considers the broadcast live.
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    /// Serialize into the storage representation.
    pub fn to_storage(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuild from the storage representation.
    pub fn from_storage(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Stored platform record attached to a session.
///
/// Immutable once created; reassigning a platform to a different session is
/// an explicit remove + create, never a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformStreamRecord {
    pub id: String,
    /// Owning session.
    pub common_id: String,
    pub platform: Platform,
    pub data: PlatformStreamData,
    pub created_at: DateTime<Utc>,
}

impl PlatformStreamRecord {
    /// Create a record owned by `common_id`.
    pub fn new(common_id: impl Into<String>, data: PlatformStreamData) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            common_id: common_id.into(),
            platform: data.platform,
            data,
            created_at: Utc::now(),
        }
    }
}

/// A session together with its platform records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamWithPlatforms {
    pub stream: Stream,
    pub platforms: Vec<PlatformStreamRecord>,
}

/// Half-open-tolerant time interval; a missing end means "still running".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Fraction of the shorter interval covered by the intersection, in
    /// [0, 1]. Open ends are substituted with `now`.
    ///
    /// Normalizing by the shorter duration (not the union) means a short
    /// interval fully inside a longer one scores 1.0, which tolerates
    /// platforms starting and stopping minutes apart. Zero-duration and
    /// inverted intervals score 0, as do intervals touching at a point.
    pub fn overlap_ratio(&self, other: &TimeRange, now: DateTime<Utc>) -> f64 {
        let end_a = self.end.unwrap_or(now);
        let end_b = other.end.unwrap_or(now);
        let duration_a = (end_a - self.start).num_milliseconds();
        let duration_b = (end_b - other.start).num_milliseconds();
        let shorter = duration_a.min(duration_b);
        if shorter <= 0 {
            return 0.0;
        }
        let overlap =
            (end_a.min(end_b) - self.start.max(other.start)).num_milliseconds();
        if overlap <= 0 {
            return 0.0;
        }
        overlap as f64 / shorter as f64
    }
}
