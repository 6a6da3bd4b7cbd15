//! Face and person repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, StoreError};
use super::records::{last_insert_rowid, FaceRecord, NewFaceRecord, NewPersonRecord, PersonRecord};
use crate::models::{Face, Person};
use crate::schema::{faces, persons};

fn to_face(record: FaceRecord) -> Face {
    Face {
        face_id: record.face_id,
        file_hash: record.file_hash,
        bbox_x: record.bbox_x,
        bbox_y: record.bbox_y,
        bbox_w: record.bbox_w,
        bbox_h: record.bbox_h,
        embedding: record.embedding,
        person_id: record.person_id,
        face_thumbnail: record.face_thumbnail,
    }
}

fn to_person(record: PersonRecord) -> Person {
    Person {
        person_id: record.person_id,
        name: record.name,
        representative_face_id: record.representative_face_id,
        photo_count: record.photo_count,
    }
}

/// Repository for detected faces and person clusters.
#[derive(Clone)]
pub struct FaceRepository {
    pool: AsyncSqlitePool,
}

impl FaceRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Store one detected face.
    pub async fn insert_face(
        &self,
        file_hash: &str,
        bbox: (i32, i32, i32, i32),
        embedding: Option<&[u8]>,
        face_thumbnail: Option<&str>,
    ) -> Result<i32, StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(faces::table)
            .values(&NewFaceRecord {
                file_hash,
                bbox_x: Some(bbox.0),
                bbox_y: Some(bbox.1),
                bbox_w: Some(bbox.2),
                bbox_h: Some(bbox.3),
                embedding,
                person_id: None,
                face_thumbnail,
            })
            .execute(&mut conn)
            .await?;
        diesel::select(last_insert_rowid()).get_result(&mut conn).await
    }

    /// All faces that carry an embedding; input to clustering.
    pub async fn faces_with_embeddings(&self) -> Result<Vec<Face>, StoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<FaceRecord> = faces::table
            .filter(faces::embedding.is_not_null())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(to_face).collect())
    }

    /// Assign a set of faces to one person.
    pub async fn assign_person(
        &self,
        face_ids: &[i32],
        person_id: i32,
    ) -> Result<(), StoreError> {
        if face_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        diesel::update(faces::table.filter(faces::face_id.eq_any(face_ids)))
            .set(faces::person_id.eq(person_id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Create a new person cluster.
    pub async fn create_person(
        &self,
        representative_face_id: Option<i32>,
        photo_count: i32,
    ) -> Result<i32, StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(persons::table)
            .values(&NewPersonRecord {
                name: None,
                representative_face_id,
                photo_count,
            })
            .execute(&mut conn)
            .await?;
        diesel::select(last_insert_rowid()).get_result(&mut conn).await
    }

    /// Look up a person by id.
    pub async fn get_person(&self, person_id: i32) -> Result<Option<Person>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<PersonRecord> = persons::table
            .find(person_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(to_person))
    }

    /// Refresh a person's member count and representative face.
    pub async fn update_person(
        &self,
        person_id: i32,
        photo_count: i32,
        representative_face_id: Option<i32>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        match representative_face_id {
            Some(face_id) => {
                diesel::update(persons::table.find(person_id))
                    .set((
                        persons::photo_count.eq(photo_count),
                        persons::representative_face_id.eq(face_id),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            None => {
                diesel::update(persons::table.find(person_id))
                    .set(persons::photo_count.eq(photo_count))
                    .execute(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    /// All persons, largest clusters first.
    pub async fn list_persons(&self) -> Result<Vec<Person>, StoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<PersonRecord> = persons::table
            .order(persons::photo_count.desc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(to_person).collect())
    }
}
