//! Motion photo handling.
//!
//! Some phones embed an MP4 clip at the end of a JPEG. Detection is a
//! byte-signature scan over the tail of the file; extraction copies the
//! embedded clip out so it can be served for hover-to-play previews.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Settings;
use crate::error::EnrichError;
use crate::pipeline::{EnrichOutcome, Enricher};
use crate::repository::PhotoRepository;

/// Markers that indicate the start of embedded MP4 data. The box itself
/// starts 4 bytes before the `ftyp` fourcc.
const MP4_SIGNATURES: [&[u8]; 4] = [b"ftypmp4", b"ftypisom", b"ftypmp42", b"ftypavc1"];

/// XMP marker used by Google Motion Photos.
const MOTION_PHOTO_MARKER: &[u8] = b"MotionPhoto";

/// How much of the file tail the detection scan reads.
const SCAN_TAIL_BYTES: u64 = 4 * 1024 * 1024;

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Check whether a JPEG carries embedded MP4 data (blocking).
pub fn detect_embedded_video(path: &Path) -> std::io::Result<bool> {
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false);
    if !is_jpeg {
        return Ok(false);
    }

    let file_size = std::fs::metadata(path)?.len();
    if file_size < 1024 {
        return Ok(false);
    }

    use std::io::{Read, Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    let scan = file_size.min(SCAN_TAIL_BYTES);
    file.seek(SeekFrom::Start(file_size - scan))?;
    let mut data = Vec::with_capacity(scan as usize);
    file.read_to_end(&mut data)?;

    Ok(MP4_SIGNATURES
        .iter()
        .any(|sig| find_subslice(&data, sig).is_some())
        || find_subslice(&data, MOTION_PHOTO_MARKER).is_some())
}

/// Find the byte offset of the embedded MP4 box, if any.
fn find_mp4_offset(data: &[u8]) -> Option<usize> {
    MP4_SIGNATURES
        .iter()
        .filter_map(|sig| find_subslice(data, sig))
        .min()
        .filter(|&idx| idx >= 4)
        .map(|idx| idx - 4)
}

fn shard_prefix(stem: &str) -> String {
    stem.chars().take(2).collect()
}

/// Extract the embedded clip to the motion-videos directory (blocking).
fn extract_motion_video(source: &Path, videos_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let data = std::fs::read(source)?;
    let Some(offset) = find_mp4_offset(&data) else {
        return Ok(None);
    };
    let clip = &data[offset..];
    if clip.len() < 8 {
        return Ok(None);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "clip".to_string());
    let dir = videos_dir.join(shard_prefix(&stem));
    std::fs::create_dir_all(&dir)?;
    let target = dir.join(format!("{stem}_motion.mp4"));
    std::fs::write(&target, clip)?;
    Ok(Some(target))
}

/// MOTION stage enricher: only items flagged `motion_photo` have work.
pub struct MotionEnricher {
    settings: Arc<Settings>,
    photos: PhotoRepository,
}

impl MotionEnricher {
    pub fn new(settings: Arc<Settings>, photos: PhotoRepository) -> Self {
        Self { settings, photos }
    }
}

#[async_trait]
impl Enricher for MotionEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if !photo.motion_photo || photo.live_photo_video.is_some() {
            return Ok(EnrichOutcome::NoOp);
        }

        let source = self.settings.photos_dir.join(&photo.file_path);
        if !source.exists() {
            return Err(EnrichError::MissingFile(source));
        }

        let videos_dir = self.settings.motion_videos_dir();
        let blocking_source = source.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_motion_video(&blocking_source, &videos_dir)
        })
        .await
        .map_err(|e| EnrichError::Backend(e.to_string()))??;

        match extracted {
            Some(_) => {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "clip".to_string());
                let stored = format!("_motion/{}/{}_motion.mp4", shard_prefix(&stem), stem);
                self.photos.set_live_photo_video(key, &stored).await?;
                debug!(key, "extracted motion video");
                Ok(EnrichOutcome::Done)
            }
            None => Ok(EnrichOutcome::NoOp),
        }
    }
}
