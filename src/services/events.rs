//! Event detection: cluster photos by time proximity and location.
//!
//! Photos are walked in capture order; a gap of more than four hours
//! starts a new run, runs are sub-split when consecutive GPS coordinates
//! jump, and only runs of three or more photos survive. The stored event
//! set is replaced wholesale on every pass.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use crate::error::EnrichError;
use crate::models::{EventCluster, Photo};
use crate::pipeline::CorpusPass;
use crate::repository::{EventRepository, PhotoRepository};

/// Maximum time gap between photos in the same event.
const EVENT_TIME_GAP_HOURS: i64 = 4;

/// Minimum photos to form an event.
const MIN_PHOTOS_PER_EVENT: usize = 3;

/// Maximum coordinate delta (degrees) still counted as the same place.
/// Roughly 5.5 km in latitude.
const LOCATION_PROXIMITY_DEGREES: f64 = 0.05;

fn split_by_time(photos: &[&Photo]) -> Vec<Vec<usize>> {
    let mut clusters = Vec::new();
    let mut current = vec![0];

    for i in 1..photos.len() {
        let (Some(prev), Some(curr)) = (photos[i - 1].date_taken, photos[i].date_taken) else {
            continue;
        };
        let gap_hours = (curr - prev).num_seconds() as f64 / 3600.0;
        if gap_hours > EVENT_TIME_GAP_HOURS as f64 {
            if current.len() >= MIN_PHOTOS_PER_EVENT {
                clusters.push(current);
            }
            current = vec![i];
        } else {
            current.push(i);
        }
    }
    if current.len() >= MIN_PHOTOS_PER_EVENT {
        clusters.push(current);
    }
    clusters
}

fn split_by_location(photos: &[&Photo], cluster: &[usize]) -> Vec<Vec<usize>> {
    let with_gps = cluster
        .iter()
        .filter(|&&i| photos[i].gps_latitude.is_some() && photos[i].gps_longitude.is_some())
        .count();
    if with_gps < 2 {
        return vec![cluster.to_vec()];
    }

    let mut result = Vec::new();
    let mut current = vec![cluster[0]];

    for pair in cluster.windows(2) {
        let (prev, curr) = (photos[pair[0]], photos[pair[1]]);
        if let (Some(lat_a), Some(lon_a), Some(lat_b), Some(lon_b)) = (
            prev.gps_latitude,
            prev.gps_longitude,
            curr.gps_latitude,
            curr.gps_longitude,
        ) {
            if (lat_b - lat_a).abs() > LOCATION_PROXIMITY_DEGREES
                || (lon_b - lon_a).abs() > LOCATION_PROXIMITY_DEGREES
            {
                result.push(current);
                current = vec![pair[1]];
                continue;
            }
        }
        current.push(pair[1]);
    }
    result.push(current);
    result
}

/// Human-readable event name from the date range and location.
fn event_name(start: DateTime<Utc>, end: DateTime<Utc>, location: Option<&str>) -> String {
    let duration = end - start;

    let time_part = if duration.num_hours() < 6 {
        let daypart = if start.hour() >= 12 { "afternoon" } else { "morning" };
        format!("{} {}", start.format("%b %d, %Y"), daypart)
    } else if duration.num_days() < 1 {
        start.format("%b %d, %Y").to_string()
    } else if duration.num_days() < 7 && start.month() == end.month() {
        format!("{}-{}", start.format("%b %d"), end.format("%d, %Y"))
    } else {
        format!("{} - {}", start.format("%b %d"), end.format("%b %d, %Y"))
    };

    match location {
        Some(location) => format!("{location} - {time_part}"),
        None => time_part,
    }
}

/// Most common city in the cluster, rendered as "City, CC".
fn cluster_location(photos: &[&Photo], cluster: &[usize]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &i in cluster {
        if let Some(city) = photos[i].location_city.as_deref() {
            *counts.entry(city).or_default() += 1;
        }
    }
    let (city, _) = counts.into_iter().max_by_key(|&(city, n)| (n, city.len()))?;

    for &i in cluster {
        if photos[i].location_city.as_deref() == Some(city) {
            return Some(match photos[i].location_country.as_deref() {
                Some(country) => format!("{city}, {country}"),
                None => city.to_string(),
            });
        }
    }
    None
}

/// Compute the event clusters for a date-ordered photo list.
pub fn detect_clusters(photos: &[Photo]) -> Vec<EventCluster> {
    let dated: Vec<&Photo> = photos.iter().filter(|p| p.date_taken.is_some()).collect();
    if dated.len() < MIN_PHOTOS_PER_EVENT {
        return Vec::new();
    }

    let mut clusters = Vec::new();
    for time_cluster in split_by_time(&dated) {
        for sub in split_by_location(&dated, &time_cluster) {
            if sub.len() < MIN_PHOTOS_PER_EVENT {
                continue;
            }

            let dates: Vec<DateTime<Utc>> =
                sub.iter().filter_map(|&i| dated[i].date_taken).collect();
            let Some(&start) = dates.iter().min() else { continue };
            let Some(&end) = dates.iter().max() else { continue };

            let location = cluster_location(&dated, &sub);
            clusters.push(EventCluster {
                name: event_name(start, end, location.as_deref()),
                start_date: start,
                end_date: end,
                location,
                members: sub.iter().map(|&i| dated[i].file_hash.clone()).collect(),
            });
        }
    }
    clusters
}

/// Whole-corpus event detection pass; replaces all stored events.
pub struct EventDetectionPass {
    photos: PhotoRepository,
    events: EventRepository,
}

impl EventDetectionPass {
    pub fn new(photos: PhotoRepository, events: EventRepository) -> Self {
        Self { photos, events }
    }
}

#[async_trait]
impl CorpusPass for EventDetectionPass {
    async fn run(&self) -> Result<usize, EnrichError> {
        let photos = self.photos.photos_with_dates().await?;
        let clusters = detect_clusters(&photos);
        self.events.replace_all(&clusters).await?;
        info!("detected {} events from {} photos", clusters.len(), photos.len());
        Ok(clusters.len())
    }
}
