//! Face and person models.

use serde::Serialize;

/// A recognized person (cluster of face embeddings treated as one identity).
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub person_id: i32,
    /// Display name, user-editable; null until assigned.
    pub name: Option<String>,
    pub representative_face_id: Option<i32>,
    pub photo_count: i32,
}

/// A detected face within a photo.
#[derive(Debug, Clone, Serialize)]
pub struct Face {
    pub face_id: i32,
    pub file_hash: String,
    pub bbox_x: Option<i32>,
    pub bbox_y: Option<i32>,
    pub bbox_w: Option<i32>,
    pub bbox_h: Option<i32>,
    /// Normalized embedding, little-endian f32 bytes. Absent when the
    /// detection engine produced no usable encoding.
    #[serde(skip)]
    pub embedding: Option<Vec<u8>>,
    pub person_id: Option<i32>,
    pub face_thumbnail: Option<String>,
}

impl Face {
    /// Decode the stored embedding bytes into an f32 vector.
    pub fn embedding_vec(&self) -> Option<Vec<f32>> {
        let bytes = self.embedding.as_ref()?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Encode an embedding vector into storable bytes.
    pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// A face found by a detection engine, before persistence.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Bounding box as (x, y, w, h) in source-image pixels.
    pub bbox: (i32, i32, i32, i32),
    /// Normalized embedding vector.
    pub embedding: Vec<f32>,
}
