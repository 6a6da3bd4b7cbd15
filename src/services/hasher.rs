//! Perceptual hashing and duplicate grouping.
//!
//! Three hashes are computed per photo (average, gradient, and DCT-based)
//! and stored as base64 strings. Duplicate grouping is a whole-corpus pass
//! over the DCT hashes: photos within a small Hamming distance are merged
//! into groups with union-find.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image_hasher::{HashAlg, HasherConfig, ImageHash};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::EnrichError;
use crate::models::PerceptualHashes;
use crate::pipeline::{CorpusPass, EnrichOutcome, Enricher};
use crate::repository::{DuplicateRepository, PhotoRepository};

/// Hamming distance at or below which two photos count as duplicates.
const DUPLICATE_THRESHOLD: u32 = 8;

/// Compute perceptual hashes for an image file (blocking).
fn compute_perceptual_hashes(path: &Path) -> Result<PerceptualHashes, image::ImageError> {
    let img = image::open(path)?;

    let ahash = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .to_hasher()
        .hash_image(&img);
    let dhash = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .to_hasher()
        .hash_image(&img);
    let phash = HasherConfig::new()
        .preproc_dct()
        .hash_alg(HashAlg::Mean)
        .to_hasher()
        .hash_image(&img);

    Ok(PerceptualHashes {
        phash: Some(phash.to_base64()),
        ahash: Some(ahash.to_base64()),
        dhash: Some(dhash.to_base64()),
    })
}

/// HASHING stage enricher.
pub struct HashingEnricher {
    settings: Arc<Settings>,
    photos: PhotoRepository,
    duplicates: DuplicateRepository,
}

impl HashingEnricher {
    pub fn new(
        settings: Arc<Settings>,
        photos: PhotoRepository,
        duplicates: DuplicateRepository,
    ) -> Self {
        Self {
            settings,
            photos,
            duplicates,
        }
    }
}

#[async_trait]
impl Enricher for HashingEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if photo.perceptual_hashed {
            return Ok(EnrichOutcome::NoOp);
        }

        let path = self.settings.photos_dir.join(&photo.file_path);
        if !path.exists() {
            return Err(EnrichError::MissingFile(path));
        }

        let hashes = tokio::task::spawn_blocking(move || compute_perceptual_hashes(&path))
            .await
            .map_err(|e| EnrichError::Backend(e.to_string()))??;

        self.duplicates.upsert_hashes(key, &hashes).await?;
        self.photos.mark_perceptual_hashed(key).await?;
        debug!(key, "computed perceptual hashes");
        Ok(EnrichOutcome::Done)
    }
}

/// Union-find over string keys.
struct UnionFind {
    parent: HashMap<String, String>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, key: &str) -> String {
        let parent = self
            .parent
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string());
        if parent == key {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(key.to_string(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// Group photos whose pHash Hamming distance is within the threshold.
fn group_by_distance(hashes: &[(String, ImageHash)], threshold: u32) -> Vec<Vec<String>> {
    let mut uf = UnionFind::new();
    for (i, (key_a, hash_a)) in hashes.iter().enumerate() {
        for (key_b, hash_b) in &hashes[i + 1..] {
            if hash_a.dist(hash_b) <= threshold {
                uf.union(key_a, key_b);
            }
        }
    }

    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for (key, _) in hashes {
        groups.entry(uf.find(key)).or_default().push(key.clone());
    }

    let mut result: Vec<Vec<String>> = groups
        .into_values()
        .filter(|members| members.len() > 1)
        .collect();
    for group in &mut result {
        group.sort();
    }
    result.sort();
    result
}

/// Whole-corpus duplicate grouping pass; replaces the stored groups.
pub struct DuplicateGroupingPass {
    duplicates: DuplicateRepository,
}

impl DuplicateGroupingPass {
    pub fn new(duplicates: DuplicateRepository) -> Self {
        Self { duplicates }
    }
}

#[async_trait]
impl CorpusPass for DuplicateGroupingPass {
    async fn run(&self) -> Result<usize, EnrichError> {
        let stored = self.duplicates.all_phashes().await?;

        let mut hashes = Vec::with_capacity(stored.len());
        for (key, phash) in stored {
            let Some(encoded) = phash else { continue };
            match ImageHash::from_base64(&encoded) {
                Ok(hash) => hashes.push((key, hash)),
                Err(_) => warn!(key = %key, "unreadable perceptual hash, skipping"),
            }
        }

        let groups = group_by_distance(&hashes, DUPLICATE_THRESHOLD);
        self.duplicates.replace_groups(&groups).await?;
        info!("found {} duplicate groups", groups.len());
        Ok(groups.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::tempdir;

    fn hash_of(bits: &[u8]) -> ImageHash {
        ImageHash::from_bytes(bits).unwrap()
    }

    #[test]
    fn near_hashes_group_and_far_hashes_do_not() {
        let hashes = vec![
            ("a".to_string(), hash_of(&[0b0000_0000, 0, 0, 0, 0, 0, 0, 0])),
            ("b".to_string(), hash_of(&[0b0000_0011, 0, 0, 0, 0, 0, 0, 0])),
            (
                "c".to_string(),
                hash_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            ),
        ];
        let groups = group_by_distance(&hashes, DUPLICATE_THRESHOLD);
        assert_eq!(groups, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn transitive_duplicates_merge_into_one_group() {
        let hashes = vec![
            ("a".to_string(), hash_of(&[0b0000_0000, 0, 0, 0, 0, 0, 0, 0])),
            ("b".to_string(), hash_of(&[0b0000_1111, 0, 0, 0, 0, 0, 0, 0])),
            ("c".to_string(), hash_of(&[0b1111_1111, 0, 0, 0, 0, 0, 0, 0])),
        ];
        // a-b and b-c are within 8 bits; a-c alone is exactly 8 too, so all
        // three land in one group either way.
        let groups = group_by_distance(&hashes, DUPLICATE_THRESHOLD);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn identical_images_produce_identical_hashes() {
        let dir = tempdir().unwrap();
        let img = RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 4) as u8, 0])
        });
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        img.save(&a).unwrap();
        img.save(&b).unwrap();

        let ha = compute_perceptual_hashes(&a).unwrap();
        let hb = compute_perceptual_hashes(&b).unwrap();
        assert_eq!(ha.phash, hb.phash);
        assert_eq!(ha.ahash, hb.ahash);
        assert_eq!(ha.dhash, hb.dhash);
    }
}
