//! Diesel row structs for database tables.

use diesel::prelude::*;

use crate::schema;

diesel::define_sql_function! {
    fn last_insert_rowid() -> diesel::sql_types::Integer;
}

/// Photo row from the database. Timestamps are stored as RFC 3339 TEXT.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::photos)]
#[diesel(primary_key(file_hash))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PhotoRecord {
    pub file_hash: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_modified: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub date_taken: Option<String>,
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
    pub location_country: Option<String>,
    pub location_city: Option<String>,
    pub location_address: Option<String>,
    pub live_photo_video: Option<String>,
    pub motion_photo: bool,
    pub exif_extracted: bool,
    pub thumbnail_generated: bool,
    pub perceptual_hashed: bool,
    pub faces_detected: bool,
    pub ollama_captioned: bool,
    pub is_favorite: bool,
    pub indexed_at: String,
    pub updated_at: String,
}

/// New photo for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::photos)]
pub struct NewPhotoRecord<'a> {
    pub file_hash: &'a str,
    pub file_path: &'a str,
    pub file_name: &'a str,
    pub file_size: i64,
    pub file_modified: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    pub live_photo_video: Option<&'a str>,
    pub motion_photo: bool,
    pub indexed_at: &'a str,
    pub updated_at: &'a str,
}

/// EXIF changeset; `None` fields are left untouched.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = schema::photos)]
pub struct ExifChangeset {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub date_taken: Option<String>,
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

/// Photo path association row.
#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::photo_paths)]
pub struct PhotoPathRecord {
    pub file_hash: String,
    pub file_path: String,
}

/// Perceptual hash row.
#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::photo_hashes)]
pub struct PhotoHashRecord {
    pub file_hash: String,
    pub phash: Option<String>,
    pub ahash: Option<String>,
    pub dhash: Option<String>,
}

/// Person row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::persons)]
#[diesel(primary_key(person_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PersonRecord {
    pub person_id: i32,
    pub name: Option<String>,
    pub representative_face_id: Option<i32>,
    pub photo_count: i32,
}

/// New person for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::persons)]
pub struct NewPersonRecord {
    pub name: Option<String>,
    pub representative_face_id: Option<i32>,
    pub photo_count: i32,
}

/// Face row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::faces)]
#[diesel(primary_key(face_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FaceRecord {
    pub face_id: i32,
    pub file_hash: String,
    pub bbox_x: Option<i32>,
    pub bbox_y: Option<i32>,
    pub bbox_w: Option<i32>,
    pub bbox_h: Option<i32>,
    pub embedding: Option<Vec<u8>>,
    pub person_id: Option<i32>,
    pub face_thumbnail: Option<String>,
}

/// New face for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::faces)]
pub struct NewFaceRecord<'a> {
    pub file_hash: &'a str,
    pub bbox_x: Option<i32>,
    pub bbox_y: Option<i32>,
    pub bbox_w: Option<i32>,
    pub bbox_h: Option<i32>,
    pub embedding: Option<&'a [u8]>,
    pub person_id: Option<i32>,
    pub face_thumbnail: Option<&'a str>,
}

/// Caption row.
#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::captions)]
pub struct CaptionRecord {
    pub file_hash: String,
    pub caption: Option<String>,
    pub model: Option<String>,
    pub created_at: String,
}

/// Event row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::events)]
#[diesel(primary_key(event_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRecord {
    pub event_id: i32,
    pub name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub location: Option<String>,
    pub photo_count: i32,
}

/// New event for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::events)]
pub struct NewEventRecord<'a> {
    pub name: Option<&'a str>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub location: Option<&'a str>,
    pub photo_count: i32,
}
