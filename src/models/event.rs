//! Event models: auto-derived clusters of photos contiguous in time and
//! location.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An auto-detected event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_id: i32,
    pub name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub photo_count: i32,
}

/// A computed event cluster, before persistence. Event rows are replaced
/// wholesale on each batch run, so clusters carry no ids.
#[derive(Debug, Clone)]
pub struct EventCluster {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub members: Vec<String>,
}
