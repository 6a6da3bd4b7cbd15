//! Photo repository: item records, path associations, and stage flags.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, StoreError};
use super::records::{ExifChangeset, NewPhotoRecord, PhotoPathRecord, PhotoRecord};
use super::{fmt_ts, parse_ts};
use crate::models::Photo;
use crate::schema::{
    captions, duplicate_members, event_photos, faces, photo_hashes, photo_paths, photo_tags,
    photos,
};

/// Data for a newly discovered file.
#[derive(Debug, Clone)]
pub struct NewPhotoFile {
    pub file_hash: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub live_photo_video: Option<String>,
    pub motion_photo: bool,
}

/// EXIF fields produced by the extraction stage.
#[derive(Debug, Clone, Default)]
pub struct ExifUpdate {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub date_taken: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub iso: Option<i32>,
    pub orientation: Option<i32>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
}

fn to_photo(record: PhotoRecord) -> Photo {
    Photo {
        file_hash: record.file_hash,
        file_path: record.file_path,
        file_name: record.file_name,
        file_size: record.file_size,
        file_modified: record.file_modified.as_deref().and_then(parse_ts),
        mime_type: record.mime_type,
        width: record.width,
        height: record.height,
        date_taken: record.date_taken.as_deref().and_then(parse_ts),
        camera_make: record.camera_make,
        camera_model: record.camera_model,
        lens_model: record.lens_model,
        focal_length: record.focal_length,
        aperture: record.aperture,
        shutter_speed: record.shutter_speed,
        iso: record.iso,
        orientation: record.orientation,
        gps_latitude: record.gps_latitude,
        gps_longitude: record.gps_longitude,
        gps_altitude: record.gps_altitude,
        location_country: record.location_country,
        location_city: record.location_city,
        location_address: record.location_address,
        live_photo_video: record.live_photo_video,
        motion_photo: record.motion_photo,
        exif_extracted: record.exif_extracted,
        thumbnail_generated: record.thumbnail_generated,
        perceptual_hashed: record.perceptual_hashed,
        faces_detected: record.faces_detected,
        ollama_captioned: record.ollama_captioned,
        is_favorite: record.is_favorite,
        indexed_at: parse_ts(&record.indexed_at).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        updated_at: parse_ts(&record.updated_at).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Repository for photo records.
#[derive(Clone)]
pub struct PhotoRepository {
    pool: AsyncSqlitePool,
}

impl PhotoRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new photo plus its primary path association.
    pub async fn insert(&self, photo: &NewPhotoFile) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let now = fmt_ts(Utc::now());
        let modified = photo.file_modified.map(fmt_ts);

        let record = NewPhotoRecord {
            file_hash: &photo.file_hash,
            file_path: &photo.file_path,
            file_name: &photo.file_name,
            file_size: photo.file_size,
            file_modified: modified.as_deref(),
            mime_type: photo.mime_type.as_deref(),
            live_photo_video: photo.live_photo_video.as_deref(),
            motion_photo: photo.motion_photo,
            indexed_at: &now,
            updated_at: &now,
        };
        diesel::insert_into(photos::table)
            .values(&record)
            .execute(&mut conn)
            .await?;

        diesel::insert_or_ignore_into(photo_paths::table)
            .values(&PhotoPathRecord {
                file_hash: photo.file_hash.clone(),
                file_path: photo.file_path.clone(),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Look up a photo by content key.
    pub async fn get(&self, file_hash: &str) -> Result<Option<Photo>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<PhotoRecord> = photos::table
            .find(file_hash)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(to_photo))
    }

    /// Find the content key registered for a relative path, if any.
    pub async fn hash_for_path(&self, file_path: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        photo_paths::table
            .filter(photo_paths::file_path.eq(file_path))
            .select(photo_paths::file_hash)
            .first(&mut conn)
            .await
            .optional()
    }

    /// Whether a (key, path) association already exists.
    pub async fn path_known(&self, file_hash: &str, file_path: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = photo_paths::table
            .filter(photo_paths::file_hash.eq(file_hash))
            .filter(photo_paths::file_path.eq(file_path))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    /// Register an additional path for known content.
    pub async fn add_path(&self, file_hash: &str, file_path: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_or_ignore_into(photo_paths::table)
            .values(&PhotoPathRecord {
                file_hash: file_hash.to_string(),
                file_path: file_path.to_string(),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Patch the primary path (used when the old one is gone).
    pub async fn set_primary_path(
        &self,
        file_hash: &str,
        file_path: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::file_path.eq(file_path),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Refresh the recorded mtime after a same-size touch.
    pub async fn touch_modified(
        &self,
        file_hash: &str,
        modified: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::file_modified.eq(fmt_ts(modified)),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// All path associations, for the cleanup pass.
    pub async fn list_paths(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<PhotoPathRecord> = photo_paths::table.load(&mut conn).await?;
        Ok(rows.into_iter().map(|r| (r.file_hash, r.file_path)).collect())
    }

    /// Remove one path association.
    pub async fn remove_path(&self, file_hash: &str, file_path: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(
            photo_paths::table
                .filter(photo_paths::file_hash.eq(file_hash))
                .filter(photo_paths::file_path.eq(file_path)),
        )
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    /// Number of paths still registered for a content key.
    pub async fn path_count(&self, file_hash: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;
        photo_paths::table
            .filter(photo_paths::file_hash.eq(file_hash))
            .count()
            .get_result(&mut conn)
            .await
    }

    /// Delete an orphaned content record and everything derived from it.
    pub async fn delete_photo(&self, file_hash: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(duplicate_members::table.filter(duplicate_members::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(event_photos::table.filter(event_photos::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(photo_tags::table.filter(photo_tags::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(captions::table.filter(captions::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(faces::table.filter(faces::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(photo_hashes::table.filter(photo_hashes::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(photo_paths::table.filter(photo_paths::file_hash.eq(file_hash)))
            .execute(&mut conn)
            .await?;
        diesel::delete(photos::table.find(file_hash))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Keys and primary paths for photos missing at least one stage flag.
    pub async fn incomplete(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.pool.get().await?;
        photos::table
            .filter(
                photos::exif_extracted
                    .eq(false)
                    .or(photos::thumbnail_generated.eq(false))
                    .or(photos::perceptual_hashed.eq(false))
                    .or(photos::faces_detected.eq(false))
                    .or(photos::ollama_captioned.eq(false)),
            )
            .select((photos::file_hash, photos::file_path))
            .load(&mut conn)
            .await
    }

    /// Apply extracted EXIF fields and set the completion flag.
    pub async fn apply_exif(&self, file_hash: &str, update: &ExifUpdate) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let changes = ExifChangeset {
            width: update.width,
            height: update.height,
            date_taken: update.date_taken.map(fmt_ts),
            camera_make: update.camera_make.clone(),
            camera_model: update.camera_model.clone(),
            lens_model: update.lens_model.clone(),
            focal_length: update.focal_length,
            aperture: update.aperture,
            shutter_speed: update.shutter_speed.clone(),
            iso: update.iso,
            orientation: update.orientation,
            gps_latitude: update.gps_latitude,
            gps_longitude: update.gps_longitude,
            gps_altitude: update.gps_altitude,
        };
        diesel::update(photos::table.find(file_hash))
            .set((
                changes,
                photos::exif_extracted.eq(true),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Store reverse-geocoded location fields.
    pub async fn set_location(
        &self,
        file_hash: &str,
        city: &str,
        country: &str,
        address: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::location_city.eq(city),
                photos::location_country.eq(country),
                photos::location_address.eq(address),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Set the thumbnail completion flag.
    pub async fn mark_thumbnail_generated(&self, file_hash: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::thumbnail_generated.eq(true),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Set the perceptual-hash completion flag.
    pub async fn mark_perceptual_hashed(&self, file_hash: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::perceptual_hashed.eq(true),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Set the face-detection completion flag.
    pub async fn mark_faces_detected(&self, file_hash: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::faces_detected.eq(true),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Set the captioning completion flag.
    pub async fn mark_captioned(&self, file_hash: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::ollama_captioned.eq(true),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Record the extracted or companion video path for a motion photo.
    pub async fn set_live_photo_video(
        &self,
        file_hash: &str,
        video_path: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(photos::table.find(file_hash))
            .set((
                photos::live_photo_video.eq(video_path),
                photos::updated_at.eq(fmt_ts(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// All photos with a timestamp, ascending; input to event detection.
    pub async fn photos_with_dates(&self) -> Result<Vec<Photo>, StoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<PhotoRecord> = photos::table
            .filter(photos::date_taken.is_not_null())
            .order(photos::date_taken.asc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(to_photo).collect())
    }

    /// Paged listing for the read API, newest first.
    pub async fn list_page(&self, limit: i64, offset: i64) -> Result<Vec<Photo>, StoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<PhotoRecord> = photos::table
            .order(photos::indexed_at.desc())
            .limit(limit)
            .offset(offset)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(to_photo).collect())
    }

    /// Total photo count.
    pub async fn count(&self) -> Result<u64, StoreError> {
        use diesel::dsl::count_star;
        let mut conn = self.pool.get().await?;
        let count: i64 = photos::table
            .select(count_star())
            .first(&mut conn)
            .await?;
        Ok(count as u64)
    }
}
