//! Photo models: the persistent item record and its derived data.
//!
//! Photos are identified by the SHA-256 of their bytes, so the same content
//! key is stable across renames and duplicate copies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// The persistent item record for one photo content key.
#[derive(Debug, Clone, Serialize)]
pub struct Photo {
    /// Hex SHA-256 of the file bytes (primary key).
    pub file_hash: String,
    /// Primary path, relative to the photos root.
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,

    // EXIF metadata
    pub date_taken: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub iso: Option<i32>,
    pub orientation: Option<i32>,

    // GPS
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,

    // Reverse geocoded location
    pub location_country: Option<String>,
    pub location_city: Option<String>,
    pub location_address: Option<String>,

    // Live Photo / Motion Photo
    pub live_photo_video: Option<String>,
    pub motion_photo: bool,

    // Per-stage completion flags
    pub exif_extracted: bool,
    pub thumbnail_generated: bool,
    pub perceptual_hashed: bool,
    pub faces_detected: bool,
    pub ollama_captioned: bool,

    // User data
    pub is_favorite: bool,

    pub indexed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Photo {
    /// Compute the content key for a byte buffer.
    pub fn compute_key(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Whether any enrichment stage still has work to do for this photo.
    pub fn needs_processing(&self) -> bool {
        !(self.exif_extracted
            && self.thumbnail_generated
            && self.perceptual_hashed
            && self.faces_detected
            && self.ollama_captioned)
    }
}

/// Perceptual hashes derived for duplicate detection.
#[derive(Debug, Clone, Serialize)]
pub struct PerceptualHashes {
    pub phash: Option<String>,
    pub ahash: Option<String>,
    pub dhash: Option<String>,
}

/// A backend-generated natural language caption.
#[derive(Debug, Clone, Serialize)]
pub struct Caption {
    pub file_hash: String,
    pub caption: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A group of perceptually similar photos.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub group_id: i32,
    pub members: Vec<String>,
}
