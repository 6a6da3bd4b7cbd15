//! Face detection and clustering.
//!
//! Detection is pluggable: a `FaceEngine` produces bounding boxes and
//! normalized embeddings for one image. The default build ships a disabled
//! engine, so the FACES stage is a cheap no-op unless an engine is wired
//! in. Clustering is a whole-corpus DBSCAN pass over cosine distance that
//! groups embeddings into persons; existing persons absorb overlapping
//! clusters so user-assigned names survive re-clustering.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::FilterType;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::EnrichError;
use crate::models::{DetectedFace, Face};
use crate::pipeline::{CorpusPass, EnrichOutcome, Enricher};
use crate::repository::{FaceRepository, PhotoRepository};

/// Max dimension of a face crop thumbnail.
const FACE_THUMB_SIZE: u32 = 150;

/// Cosine distance threshold for two faces to count as the same person.
const CLUSTER_EPS: f64 = 0.4;

/// Minimum faces to form a person cluster.
const CLUSTER_MIN_SAMPLES: usize = 2;

/// A face detection capability. Implementations are blocking; the enricher
/// runs them on the blocking pool.
pub trait FaceEngine: Send + Sync {
    /// Whether a usable model is loaded.
    fn is_available(&self) -> bool;

    /// Detect faces and compute normalized embeddings for one image.
    fn detect(&self, path: &Path) -> Result<Vec<DetectedFace>, EnrichError>;
}

/// The default engine: no model, no detections.
pub struct DisabledFaceEngine;

impl FaceEngine for DisabledFaceEngine {
    fn is_available(&self) -> bool {
        false
    }

    fn detect(&self, _path: &Path) -> Result<Vec<DetectedFace>, EnrichError> {
        Ok(Vec::new())
    }
}

fn shard_prefix(key: &str) -> &str {
    &key[..key.len().min(2)]
}

/// Crop one face out of the source image with 30% padding (blocking).
/// Returns the crop path relative to the data dir.
fn generate_face_crop(
    source: &Path,
    faces_dir: &Path,
    bbox: (i32, i32, i32, i32),
    file_hash: &str,
    face_idx: usize,
) -> Result<Option<String>, EnrichError> {
    let img = image::open(source)?;
    let (x, y, w, h) = bbox;

    let pad_x = (w as f32 * 0.3) as i32;
    let pad_y = (h as f32 * 0.3) as i32;
    let left = (x - pad_x).max(0) as u32;
    let top = (y - pad_y).max(0) as u32;
    let right = ((x + w + pad_x).max(0) as u32).min(img.width());
    let bottom = ((y + h + pad_y).max(0) as u32).min(img.height());
    if right <= left || bottom <= top {
        return Ok(None);
    }

    let crop = img.crop_imm(left, top, right - left, bottom - top);
    let crop = crop.resize(FACE_THUMB_SIZE, FACE_THUMB_SIZE, FilterType::Lanczos3);
    let crop = image::DynamicImage::ImageRgb8(crop.to_rgb8());

    let dir = faces_dir.join(shard_prefix(file_hash));
    std::fs::create_dir_all(&dir)?;
    let filename = format!("{file_hash}_face{face_idx}.webp");
    crop.save(dir.join(&filename))?;

    Ok(Some(format!("faces/{}/{}", shard_prefix(file_hash), filename)))
}

/// FACES stage enricher: detect, crop, persist.
pub struct FaceEnricher {
    settings: Arc<Settings>,
    photos: PhotoRepository,
    faces: FaceRepository,
    engine: Arc<dyn FaceEngine>,
}

impl FaceEnricher {
    pub fn new(
        settings: Arc<Settings>,
        photos: PhotoRepository,
        faces: FaceRepository,
        engine: Arc<dyn FaceEngine>,
    ) -> Self {
        Self {
            settings,
            photos,
            faces,
            engine,
        }
    }
}

#[async_trait]
impl Enricher for FaceEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if photo.faces_detected {
            return Ok(EnrichOutcome::NoOp);
        }

        let source = self.settings.photos_dir.join(&photo.file_path);
        if !source.exists() {
            return Err(EnrichError::MissingFile(source));
        }

        let detected = if self.engine.is_available() {
            let engine = Arc::clone(&self.engine);
            let faces_dir = self.settings.faces_dir();
            let file_hash = key.to_string();
            tokio::task::spawn_blocking(move || {
                let faces = engine.detect(&source)?;
                let mut out = Vec::with_capacity(faces.len());
                for (idx, face) in faces.into_iter().enumerate() {
                    let crop =
                        generate_face_crop(&source, &faces_dir, face.bbox, &file_hash, idx)?;
                    out.push((face, crop));
                }
                Ok::<_, EnrichError>(out)
            })
            .await
            .map_err(|e| EnrichError::Backend(e.to_string()))??
        } else {
            Vec::new()
        };

        let count = detected.len();
        for (face, crop) in detected {
            let embedding = Face::encode_embedding(&face.embedding);
            self.faces
                .insert_face(key, face.bbox, Some(&embedding), crop.as_deref())
                .await?;
        }

        // The flag is set even with zero detections (or no engine) so the
        // stage stays idempotent; a rescan after installing a model goes
        // through clear_processed + clear_index.
        self.photos.mark_faces_detected(key).await?;
        if count > 0 {
            debug!(key, "detected {} faces", count);
        }
        Ok(EnrichOutcome::Done)
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// DBSCAN over cosine distance. Returns one label per input; -1 is noise.
fn dbscan_cosine(embeddings: &[Vec<f32>], eps: f64, min_samples: usize) -> Vec<i32> {
    const UNVISITED: i32 = -2;
    const NOISE: i32 = -1;

    let n = embeddings.len();
    let mut labels = vec![UNVISITED; n];
    let mut cluster = 0;

    let neighbors = |p: usize| -> Vec<usize> {
        (0..n)
            .filter(|&q| cosine_distance(&embeddings[p], &embeddings[q]) <= eps)
            .collect()
    };

    for p in 0..n {
        if labels[p] != UNVISITED {
            continue;
        }
        let seeds = neighbors(p);
        if seeds.len() < min_samples {
            labels[p] = NOISE;
            continue;
        }

        labels[p] = cluster;
        let mut queue: Vec<usize> = seeds;
        let mut i = 0;
        while i < queue.len() {
            let q = queue[i];
            i += 1;
            if labels[q] == NOISE {
                labels[q] = cluster;
            }
            if labels[q] != UNVISITED {
                continue;
            }
            labels[q] = cluster;
            let q_neighbors = neighbors(q);
            if q_neighbors.len() >= min_samples {
                queue.extend(q_neighbors);
            }
        }
        cluster += 1;
    }

    labels
}

/// Whole-corpus face clustering pass. Returns the number of new persons.
pub struct FaceClusteringPass {
    faces: FaceRepository,
}

impl FaceClusteringPass {
    pub fn new(faces: FaceRepository) -> Self {
        Self { faces }
    }
}

#[async_trait]
impl CorpusPass for FaceClusteringPass {
    async fn run(&self) -> Result<usize, EnrichError> {
        let all_faces = self.faces.faces_with_embeddings().await?;

        let mut usable: Vec<(&Face, Vec<f32>)> = Vec::with_capacity(all_faces.len());
        for face in &all_faces {
            if let Some(embedding) = face.embedding_vec() {
                usable.push((face, embedding));
            }
        }
        if usable.len() < CLUSTER_MIN_SAMPLES {
            return Ok(0);
        }

        let embeddings: Vec<Vec<f32>> = usable.iter().map(|(_, e)| e.clone()).collect();
        let labels = dbscan_cosine(&embeddings, CLUSTER_EPS, CLUSTER_MIN_SAMPLES);

        let mut clusters: HashMap<i32, Vec<&Face>> = HashMap::new();
        for ((face, _), &label) in usable.iter().zip(labels.iter()) {
            if label >= 0 {
                clusters.entry(label).or_default().push(face);
            }
        }

        let mut new_persons = 0;
        let mut cluster_labels: Vec<i32> = clusters.keys().copied().collect();
        cluster_labels.sort();

        for label in cluster_labels {
            let members = &clusters[&label];
            let unique_photos: HashSet<&str> =
                members.iter().map(|f| f.file_hash.as_str()).collect();
            let face_ids: Vec<i32> = members.iter().map(|f| f.face_id).collect();

            // If any member already belongs to a person, the majority
            // existing person absorbs the cluster.
            let mut existing_counts: HashMap<i32, usize> = HashMap::new();
            for face in members.iter() {
                if let Some(person_id) = face.person_id {
                    *existing_counts.entry(person_id).or_default() += 1;
                }
            }

            let person_id = match existing_counts.into_iter().max_by_key(|&(id, n)| (n, id)) {
                Some((person_id, _)) => person_id,
                None => {
                    new_persons += 1;
                    self.faces
                        .create_person(face_ids.first().copied(), unique_photos.len() as i32)
                        .await?
                }
            };

            self.faces.assign_person(&face_ids, person_id).await?;

            let representative = match self.faces.get_person(person_id).await? {
                Some(person) if person.representative_face_id.is_some() => None,
                _ => face_ids.first().copied(),
            };
            self.faces
                .update_person(person_id, unique_photos.len() as i32, representative)
                .await?;
        }

        info!("face clustering: {} clusters, {} new persons", clusters.len(), new_persons);
        Ok(new_persons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::repository::{migrations, NewPhotoFile, Store};

    #[test]
    fn dbscan_separates_distinct_clusters_and_noise() {
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.05, 0.0],
            vec![0.98, 0.08, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.05, 0.99, 0.0],
            // Orthogonal to both clusters: noise.
            vec![0.0, 0.0, 1.0],
        ];
        let labels = dbscan_cosine(&embeddings, CLUSTER_EPS, CLUSTER_MIN_SAMPLES);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[5], -1);
    }

    #[test]
    fn cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]) < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    async fn store_with_faces(dir: &Path) -> Store {
        let db_path = dir.join("test.db");
        migrations::run_migrations(&db_path.display().to_string())
            .await
            .unwrap();
        let store = Store::from_path(&db_path);

        for (i, key) in ["p1", "p2", "p3", "p4", "p5"].iter().enumerate() {
            store
                .photos()
                .insert(&NewPhotoFile {
                    file_hash: key.to_string(),
                    file_path: format!("{i}.jpg"),
                    file_name: format!("{i}.jpg"),
                    file_size: 1,
                    file_modified: None,
                    mime_type: None,
                    live_photo_video: None,
                    motion_photo: false,
                })
                .await
                .unwrap();
        }

        let cluster_a = [
            vec![1.0_f32, 0.0, 0.0],
            vec![0.99, 0.05, 0.0],
            vec![0.98, 0.08, 0.0],
        ];
        let cluster_b = [vec![0.0_f32, 1.0, 0.0], vec![0.05, 0.99, 0.0]];

        for (i, embedding) in cluster_a.iter().enumerate() {
            let bytes = Face::encode_embedding(embedding);
            store
                .faces()
                .insert_face(&format!("p{}", i + 1), (0, 0, 10, 10), Some(&bytes), None)
                .await
                .unwrap();
        }
        for (i, embedding) in cluster_b.iter().enumerate() {
            let bytes = Face::encode_embedding(embedding);
            store
                .faces()
                .insert_face(&format!("p{}", i + 4), (0, 0, 10, 10), Some(&bytes), None)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn clustering_creates_persons_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_with_faces(dir.path()).await;

        let pass = FaceClusteringPass::new(store.faces());
        let created = pass.run().await.unwrap();
        assert_eq!(created, 2);

        let persons = store.faces().list_persons().await.unwrap();
        assert_eq!(persons.len(), 2);
        let counts: Vec<i32> = persons.iter().map(|p| p.photo_count).collect();
        assert!(counts.contains(&3));
        assert!(counts.contains(&2));
        assert!(persons.iter().all(|p| p.representative_face_id.is_some()));

        // Re-running with no new data yields the same aggregates: existing
        // persons absorb their clusters instead of duplicating.
        let created_again = pass.run().await.unwrap();
        assert_eq!(created_again, 0);
        assert_eq!(store.faces().list_persons().await.unwrap().len(), 2);
    }
}
