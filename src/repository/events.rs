//! Event repository. Event rows are replaced wholesale on each batch run.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::pool::{AsyncSqlitePool, StoreError};
use super::records::{last_insert_rowid, EventRecord, NewEventRecord};
use super::{fmt_ts, parse_ts};
use crate::models::{Event, EventCluster};
use crate::schema::{event_photos, events};

fn to_event(record: EventRecord) -> Event {
    Event {
        event_id: record.event_id,
        name: record.name,
        start_date: record.start_date.as_deref().and_then(parse_ts),
        end_date: record.end_date.as_deref().and_then(parse_ts),
        location: record.location,
        photo_count: record.photo_count,
    }
}

/// Repository for auto-detected events.
#[derive(Clone)]
pub struct EventRepository {
    pool: AsyncSqlitePool,
}

impl EventRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Replace all events and memberships with a freshly computed set.
    pub async fn replace_all(&self, clusters: &[EventCluster]) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel::delete(event_photos::table).execute(conn).await?;
                diesel::delete(events::table).execute(conn).await?;

                for cluster in clusters {
                    diesel::insert_into(events::table)
                        .values(&NewEventRecord {
                            name: Some(&cluster.name),
                            start_date: Some(fmt_ts(cluster.start_date)),
                            end_date: Some(fmt_ts(cluster.end_date)),
                            location: cluster.location.as_deref(),
                            photo_count: cluster.members.len() as i32,
                        })
                        .execute(conn)
                        .await?;
                    let event_id: i32 =
                        diesel::select(last_insert_rowid()).get_result(conn).await?;

                    for member in &cluster.members {
                        diesel::insert_into(event_photos::table)
                            .values((
                                event_photos::event_id.eq(event_id),
                                event_photos::file_hash.eq(member),
                            ))
                            .execute(conn)
                            .await?;
                    }
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    /// All events, newest first.
    pub async fn list(&self) -> Result<Vec<Event>, StoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<EventRecord> = events::table
            .order(events::start_date.desc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(to_event).collect())
    }

    /// Member keys for one event.
    pub async fn members(&self, event_id: i32) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        event_photos::table
            .filter(event_photos::event_id.eq(event_id))
            .select(event_photos::file_hash)
            .load(&mut conn)
            .await
    }
}
