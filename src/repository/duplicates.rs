//! Perceptual hash and duplicate group repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::fmt_ts;
use super::pool::{AsyncSqlitePool, StoreError};
use super::records::{last_insert_rowid, PhotoHashRecord};
use crate::models::{DuplicateGroup, PerceptualHashes};
use crate::schema::{duplicate_groups, duplicate_members, photo_hashes};

/// Repository for perceptual hashes and duplicate groups.
#[derive(Clone)]
pub struct DuplicateRepository {
    pool: AsyncSqlitePool,
}

impl DuplicateRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the perceptual hashes for a photo.
    pub async fn upsert_hashes(
        &self,
        file_hash: &str,
        hashes: &PerceptualHashes,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::replace_into(photo_hashes::table)
            .values(&PhotoHashRecord {
                file_hash: file_hash.to_string(),
                phash: hashes.phash.clone(),
                ahash: hashes.ahash.clone(),
                dhash: hashes.dhash.clone(),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// All (key, phash) pairs; input to duplicate grouping.
    pub async fn all_phashes(&self) -> Result<Vec<(String, Option<String>)>, StoreError> {
        let mut conn = self.pool.get().await?;
        photo_hashes::table
            .select((photo_hashes::file_hash, photo_hashes::phash))
            .load(&mut conn)
            .await
    }

    /// Replace all duplicate groups with a freshly computed set.
    pub async fn replace_groups(&self, groups: &[Vec<String>]) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel::delete(duplicate_members::table).execute(conn).await?;
                diesel::delete(duplicate_groups::table).execute(conn).await?;

                for group in groups {
                    diesel::insert_into(duplicate_groups::table)
                        .values(duplicate_groups::created_at.eq(fmt_ts(Utc::now())))
                        .execute(conn)
                        .await?;
                    let group_id: i32 =
                        diesel::select(last_insert_rowid()).get_result(conn).await?;
                    for member in group {
                        diesel::insert_into(duplicate_members::table)
                            .values((
                                duplicate_members::group_id.eq(group_id),
                                duplicate_members::file_hash.eq(member),
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

    /// All duplicate groups with their members.
    pub async fn list_groups(&self) -> Result<Vec<DuplicateGroup>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<(i32, String)> = duplicate_members::table
            .select((duplicate_members::group_id, duplicate_members::file_hash))
            .order(duplicate_members::group_id.asc())
            .load(&mut conn)
            .await?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for (group_id, file_hash) in rows {
            match groups.last_mut() {
                Some(group) if group.group_id == group_id => group.members.push(file_hash),
                _ => groups.push(DuplicateGroup {
                    group_id,
                    members: vec![file_hash],
                }),
            }
        }
        Ok(groups)
    }
}
