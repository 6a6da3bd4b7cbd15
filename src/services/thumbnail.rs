//! Thumbnail generation: hash-prefix-sharded WebP files at multiple sizes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageResult};
use tracing::debug;

use crate::config::Settings;
use crate::error::EnrichError;
use crate::pipeline::{EnrichOutcome, Enricher};
use crate::repository::PhotoRepository;

/// Path for one thumbnail, sharded by the first two key characters to cap
/// per-directory entry count.
pub fn thumbnail_path(thumbs_dir: &Path, file_hash: &str, size: u32) -> PathBuf {
    let prefix = &file_hash[..file_hash.len().min(2)];
    thumbs_dir.join(prefix).join(format!("{file_hash}_{size}.webp"))
}

/// Apply the EXIF orientation recorded for the photo.
pub fn apply_exif_orientation(img: DynamicImage, orientation: Option<i32>) -> DynamicImage {
    match orientation {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

/// Generate thumbnails at every requested size (blocking). Existing files
/// are kept; thumbnails never upscale.
pub fn generate_thumbnails(
    source: &Path,
    file_hash: &str,
    sizes: &[u32],
    thumbs_dir: &Path,
    orientation: Option<i32>,
) -> ImageResult<Vec<PathBuf>> {
    let img = image::open(source)?;
    let img = apply_exif_orientation(img, orientation);
    let img = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut created = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let target = thumbnail_path(thumbs_dir, file_hash, size);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if target.exists() {
            created.push(target);
            continue;
        }

        let thumb = if img.width().max(img.height()) > size {
            img.resize(size, size, FilterType::Lanczos3)
        } else {
            img.clone()
        };
        thumb.save(&target)?;
        created.push(target);
    }
    Ok(created)
}

/// THUMBNAILS stage enricher.
pub struct ThumbnailEnricher {
    settings: Arc<Settings>,
    photos: PhotoRepository,
}

impl ThumbnailEnricher {
    pub fn new(settings: Arc<Settings>, photos: PhotoRepository) -> Self {
        Self { settings, photos }
    }
}

#[async_trait]
impl Enricher for ThumbnailEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if photo.thumbnail_generated {
            return Ok(EnrichOutcome::NoOp);
        }

        let source = self.settings.photos_dir.join(&photo.file_path);
        if !source.exists() {
            return Err(EnrichError::MissingFile(source));
        }

        let sizes = self.settings.thumbnail_sizes.clone();
        let thumbs_dir = self.settings.thumbnails_dir();
        let file_hash = key.to_string();
        let orientation = photo.orientation;
        let created = tokio::task::spawn_blocking(move || {
            generate_thumbnails(&source, &file_hash, &sizes, &thumbs_dir, orientation)
        })
        .await
        .map_err(|e| EnrichError::Backend(e.to_string()))??;

        self.photos.mark_thumbnail_generated(key).await?;
        debug!(key, "generated {} thumbnails", created.len());
        Ok(EnrichOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::tempdir;

    fn write_test_image(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn generates_sharded_webp_files_at_each_size() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_test_image(&source, 640, 480);

        let thumbs = dir.path().join("thumbs");
        let key = "abcdef0123456789";
        let created = generate_thumbnails(&source, key, &[200, 600], &thumbs, None).unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(created[0], thumbs.join("ab").join("abcdef0123456789_200.webp"));
        for path in &created {
            assert!(path.exists());
        }

        let (w, h) = image::image_dimensions(&created[0]).unwrap();
        assert!(w <= 200 && h <= 200);
        // Aspect ratio preserved.
        assert_eq!(w, 200);
        assert_eq!(h, 150);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("small.png");
        write_test_image(&source, 100, 50);

        let thumbs = dir.path().join("thumbs");
        let created = generate_thumbnails(&source, "ff00", &[600], &thumbs, None).unwrap();
        let (w, h) = image::image_dimensions(&created[0]).unwrap();
        assert_eq!((w, h), (100, 50));
    }

    #[test]
    fn orientation_rotates_dimensions() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("rot.png");
        write_test_image(&source, 400, 200);

        let thumbs = dir.path().join("thumbs");
        let created = generate_thumbnails(&source, "cc11", &[600], &thumbs, Some(6)).unwrap();
        let (w, h) = image::image_dimensions(&created[0]).unwrap();
        assert_eq!((w, h), (200, 400));
    }

    #[test]
    fn existing_thumbnails_are_reused() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_test_image(&source, 640, 480);
        let thumbs = dir.path().join("thumbs");

        let first = generate_thumbnails(&source, "aa00", &[200], &thumbs, None).unwrap();
        let mtime = std::fs::metadata(&first[0]).unwrap().modified().unwrap();

        let second = generate_thumbnails(&source, "aa00", &[200], &thumbs, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            std::fs::metadata(&second[0]).unwrap().modified().unwrap(),
            mtime
        );
    }
}
