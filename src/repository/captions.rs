//! Caption and tag repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::fmt_ts;
use super::pool::{AsyncSqlitePool, StoreError};
use super::records::CaptionRecord;
use crate::schema::{captions, photo_tags, tags};

/// Repository for backend-generated captions and tags.
#[derive(Clone)]
pub struct CaptionRepository {
    pool: AsyncSqlitePool,
}

impl CaptionRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the caption for a photo.
    pub async fn upsert_caption(
        &self,
        file_hash: &str,
        caption: &str,
        model: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::replace_into(captions::table)
            .values(&CaptionRecord {
                file_hash: file_hash.to_string(),
                caption: Some(caption.to_string()),
                model: Some(model.to_string()),
                created_at: fmt_ts(Utc::now()),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Fetch the caption text for a photo, if any.
    pub async fn caption_for(&self, file_hash: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<CaptionRecord> = captions::table
            .find(file_hash)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.and_then(|r| r.caption))
    }

    /// Get or create a tag, returning its id.
    pub async fn ensure_tag(&self, name: &str) -> Result<i32, StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_or_ignore_into(tags::table)
            .values(tags::name.eq(name))
            .execute(&mut conn)
            .await?;
        tags::table
            .filter(tags::name.eq(name))
            .select(tags::tag_id)
            .first(&mut conn)
            .await
    }

    /// Associate a tag with a photo (no-op if already present).
    pub async fn tag_photo(&self, file_hash: &str, tag_id: i32) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_or_ignore_into(photo_tags::table)
            .values((
                photo_tags::file_hash.eq(file_hash),
                photo_tags::tag_id.eq(tag_id),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Tag names attached to a photo.
    pub async fn tags_for(&self, file_hash: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        photo_tags::table
            .inner_join(tags::table.on(tags::tag_id.eq(photo_tags::tag_id)))
            .filter(photo_tags::file_hash.eq(file_hash))
            .select(tags::name)
            .load(&mut conn)
            .await
    }
}
