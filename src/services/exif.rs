//! EXIF extraction: camera metadata, capture time, and GPS coordinates.
//!
//! Falls back to the file's filesystem date when no EXIF date exists, so
//! every photo gets a `date_taken` for timeline and event grouping.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use exif::{In, Tag, Value};
use tracing::debug;

use crate::config::Settings;
use crate::error::EnrichError;
use crate::pipeline::{EnrichOutcome, Enricher};
use crate::repository::{ExifUpdate, PhotoRepository};

/// Convert GPS degrees/minutes/seconds to decimal degrees. All-zero
/// components are placeholder data and rejected.
fn dms_to_decimal(dms: &[f64], reference: &str) -> Option<f64> {
    if dms.len() < 3 {
        return None;
    }
    let (degrees, minutes, seconds) = (dms[0], dms[1], dms[2]);
    if degrees == 0.0 && minutes == 0.0 && seconds == 0.0 {
        return None;
    }
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    if matches!(reference, "S" | "W") {
        decimal = -decimal;
    }
    Some(decimal)
}

/// Parse the datetime shapes EXIF writers produce.
fn parse_exif_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    for fmt in ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y:%m:%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

/// Earliest of mtime and creation time. Creation time is often the copy
/// time while mtime carries the original date, so the earlier one wins.
fn filesystem_date(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).ok()?;
    let mtime = metadata.modified().ok().map(DateTime::<Utc>::from);
    let ctime = metadata.created().ok().map(DateTime::<Utc>::from);
    match (mtime, ctime) {
        (Some(m), Some(c)) => Some(m.min(c)),
        (Some(m), None) => Some(m),
        (None, Some(c)) => Some(c),
        (None, None) => None,
    }
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|v| String::from_utf8_lossy(v).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational_field(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(values) => values.first().map(|r| r.to_f64()),
        Value::SRational(values) => values.first().map(|r| r.to_f64()),
        _ => None,
    }
}

fn uint_field(exif: &exif::Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

fn rational_list(exif: &exif::Exif, tag: Tag) -> Option<Vec<f64>> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(values) => Some(values.iter().map(|r| r.to_f64()).collect()),
        _ => None,
    }
}

/// Read EXIF metadata from an image file (blocking). Never fails outright:
/// files without EXIF still get dimensions and a filesystem date.
fn read_exif_data(path: &Path) -> ExifUpdate {
    let mut update = ExifUpdate::default();

    if let Ok((width, height)) = image::image_dimensions(path) {
        update.width = Some(width as i32);
        update.height = Some(height as i32);
    }

    let parsed = std::fs::File::open(path).ok().and_then(|file| {
        let mut reader = std::io::BufReader::new(file);
        exif::Reader::new().read_from_container(&mut reader).ok()
    });

    if let Some(exif) = parsed {
        update.camera_make = ascii_field(&exif, Tag::Make);
        update.camera_model = ascii_field(&exif, Tag::Model);
        update.lens_model = ascii_field(&exif, Tag::LensModel);
        update.orientation = uint_field(&exif, Tag::Orientation).map(|v| v as i32);
        update.iso = uint_field(&exif, Tag::PhotographicSensitivity).map(|v| v as i32);
        update.focal_length = rational_field(&exif, Tag::FocalLength);
        update.aperture = rational_field(&exif, Tag::FNumber);

        if let Some(field) = exif.get_field(Tag::ExposureTime, In::PRIMARY) {
            if let Value::Rational(values) = &field.value {
                if let Some(r) = values.first().filter(|r| r.num > 0 && r.denom > 0) {
                    update.shutter_speed = Some(format!("{}/{}", r.num, r.denom));
                }
            }
        }

        for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime] {
            if let Some(value) = ascii_field(&exif, tag) {
                if let Some(dt) = parse_exif_datetime(&value) {
                    update.date_taken = Some(dt);
                    break;
                }
            }
        }

        if let (Some(dms), Some(reference)) = (
            rational_list(&exif, Tag::GPSLatitude),
            ascii_field(&exif, Tag::GPSLatitudeRef),
        ) {
            update.gps_latitude = dms_to_decimal(&dms, &reference);
        }
        if let (Some(dms), Some(reference)) = (
            rational_list(&exif, Tag::GPSLongitude),
            ascii_field(&exif, Tag::GPSLongitudeRef),
        ) {
            update.gps_longitude = dms_to_decimal(&dms, &reference);
        }
        update.gps_altitude = rational_field(&exif, Tag::GPSAltitude);
    }

    if update.date_taken.is_none() {
        update.date_taken = filesystem_date(path);
        if update.date_taken.is_some() {
            debug!("no EXIF date for {}, using filesystem date", path.display());
        }
    }

    update
}

/// EXIF stage enricher.
pub struct ExifEnricher {
    settings: Arc<Settings>,
    photos: PhotoRepository,
}

impl ExifEnricher {
    pub fn new(settings: Arc<Settings>, photos: PhotoRepository) -> Self {
        Self { settings, photos }
    }
}

#[async_trait]
impl Enricher for ExifEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if photo.exif_extracted {
            return Ok(EnrichOutcome::NoOp);
        }

        let path = self.settings.photos_dir.join(&photo.file_path);
        if !path.exists() {
            return Err(EnrichError::MissingFile(path));
        }

        let update = tokio::task::spawn_blocking(move || read_exif_data(&path))
            .await
            .map_err(|e| EnrichError::Backend(e.to_string()))?;

        self.photos.apply_exif(key, &update).await?;
        debug!(key, "extracted EXIF");
        Ok(EnrichOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dms_conversion_handles_hemispheres() {
        let paris_lat = dms_to_decimal(&[48.0, 51.0, 30.24], "N").unwrap();
        assert!((paris_lat - 48.8584).abs() < 0.001);

        let south = dms_to_decimal(&[33.0, 52.0, 4.0], "S").unwrap();
        assert!(south < 0.0);

        let west = dms_to_decimal(&[2.0, 17.0, 40.2], "W").unwrap();
        assert!(west < 0.0);
    }

    #[test]
    fn all_zero_gps_is_rejected() {
        assert_eq!(dms_to_decimal(&[0.0, 0.0, 0.0], "N"), None);
        assert!(dms_to_decimal(&[0.0, 30.0, 0.0], "N").is_some());
    }

    #[test]
    fn exif_datetime_formats_parse() {
        let dt = parse_exif_datetime("2024:05:01 12:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T12:00:00+00:00");

        assert!(parse_exif_datetime("2024-05-01 12:00:00").is_some());
        assert!(parse_exif_datetime("2024:05:01").is_some());
        assert!(parse_exif_datetime("not a date").is_none());
    }

    #[test]
    fn plain_file_still_gets_a_filesystem_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, b"no exif here").unwrap();

        let update = read_exif_data(&path);
        assert!(update.date_taken.is_some());
        assert!(update.camera_make.is_none());
    }
}
