//! Persistence layer: async SQLite access via diesel.
//!
//! Repositories are cheap handles over a shared connection factory. Each
//! operation opens its own connection; correctness across concurrent
//! workers relies on WAL mode plus the per-stage idempotence flags, not on
//! row locks.

mod captions;
mod duplicates;
mod events;
mod faces;
pub mod migrations;
mod photos;
mod pool;
mod records;

pub use captions::CaptionRepository;
pub use duplicates::DuplicateRepository;
pub use events::EventRepository;
pub use faces::FaceRepository;
pub use photos::{ExifUpdate, NewPhotoFile, PhotoRepository};
pub use pool::{AsyncSqlitePool, StoreError};

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Handle to all repositories backed by one database.
#[derive(Clone)]
pub struct Store {
    pool: AsyncSqlitePool,
}

impl Store {
    /// Create a store from a database URL (`sqlite:` prefix optional).
    pub fn from_url(url: &str) -> Self {
        Self {
            pool: AsyncSqlitePool::new(url),
        }
    }

    /// Create a store from a database file path.
    pub fn from_path(path: &Path) -> Self {
        Self {
            pool: AsyncSqlitePool::from_path(path),
        }
    }

    pub fn photos(&self) -> PhotoRepository {
        PhotoRepository::new(self.pool.clone())
    }

    pub fn faces(&self) -> FaceRepository {
        FaceRepository::new(self.pool.clone())
    }

    pub fn events(&self) -> EventRepository {
        EventRepository::new(self.pool.clone())
    }

    pub fn captions(&self) -> CaptionRepository {
        CaptionRepository::new(self.pool.clone())
    }

    pub fn duplicates(&self) -> DuplicateRepository {
        DuplicateRepository::new(self.pool.clone())
    }

    /// Delete every persistent record, respecting foreign-key order.
    pub async fn clear_index(&self) -> Result<(), StoreError> {
        use diesel_async::RunQueryDsl;

        let mut conn = self.pool.get().await?;
        for table in [
            "duplicate_members",
            "duplicate_groups",
            "event_photos",
            "events",
            "photo_tags",
            "tags",
            "captions",
            "faces",
            "persons",
            "photo_hashes",
            "photo_paths",
            "photos",
        ] {
            diesel::sql_query(format!("DELETE FROM {table}"))
                .execute(&mut conn)
                .await?;
        }
        Ok(())
    }
}

/// Format a timestamp for TEXT storage (RFC 3339 UTC).
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored TEXT timestamp. Accepts RFC 3339 and the bare
/// `YYYY-MM-DDTHH:MM:SS` shape older rows may carry.
pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_ts(&fmt_ts(ts)), Some(ts));
    }

    #[test]
    fn parses_bare_naive_timestamps() {
        let parsed = parse_ts("2024-05-01T12:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }
}
