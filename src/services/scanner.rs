//! Directory scanner: discovers and indexes photos from the photo tree.
//!
//! The walk is cheap-first: size and mtime decide whether the expensive
//! content digest runs at all. Three outcomes per file: unchanged (skip),
//! known content under a new path (register the path), new content
//! (insert and hand to the pipeline).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::motion;
use crate::config::Settings;
use crate::repository::{NewPhotoFile, PhotoRepository, StoreError};

/// Buffer size for content hashing (64 KiB).
const HASH_BUFFER_SIZE: usize = 65536;

/// Tolerance when comparing stored mtimes against the filesystem.
const MTIME_TOLERANCE_SECS: i64 = 1;

/// Progress and discovery events emitted while a scan runs.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Progress {
        processed: usize,
        total: usize,
        current: String,
    },
    /// A new content key was inserted and should enter the pipeline.
    Discovered { key: String, path: String },
}

/// Scan statistics.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub removed: usize,
    pub cancelled: bool,
}

/// Compute the SHA-256 content key of a file (blocking).
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Find an associated Live Photo video (same stem, `.mov`) for a photo.
fn find_live_photo_video(path: &Path) -> Option<PathBuf> {
    for ext in ["mov", "MOV"] {
        let candidate = path.with_extension(ext);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn mtime_of(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

enum IndexOutcome {
    New { key: String },
    Updated,
    Skipped,
}

/// File scanner over the configured photo tree.
#[derive(Clone)]
pub struct Scanner {
    settings: Arc<Settings>,
    photos: PhotoRepository,
}

impl Scanner {
    pub fn new(settings: Arc<Settings>, photos: PhotoRepository) -> Self {
        Self { settings, photos }
    }

    /// Walk the photo tree, emitting progress and discovery events. The
    /// cancel check runs between batches; a cancelled scan skips the
    /// cleanup pass.
    pub async fn scan(
        &self,
        events: mpsc::Sender<ScanEvent>,
        cancel: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> ScanStats {
        let mut stats = ScanStats::default();

        let photos_dir = &self.settings.photos_dir;
        if !photos_dir.exists() {
            warn!("photos directory does not exist: {}", photos_dir.display());
            return stats;
        }

        let files: Vec<PathBuf> = WalkDir::new(photos_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.settings.is_supported_photo(path))
            .collect();

        stats.total = files.len();
        info!("found {} photo files in {}", stats.total, photos_dir.display());

        for (batch_start, batch) in files
            .chunks(self.settings.batch_size.max(1))
            .enumerate()
            .map(|(i, b)| (i * self.settings.batch_size.max(1), b))
        {
            if cancel() {
                info!("scan cancelled");
                stats.cancelled = true;
                break;
            }

            for (offset, path) in batch.iter().enumerate() {
                match self.index_photo(path).await {
                    Ok(IndexOutcome::New { key }) => {
                        stats.new += 1;
                        let _ = events
                            .send(ScanEvent::Discovered {
                                key,
                                path: path.display().to_string(),
                            })
                            .await;
                    }
                    Ok(IndexOutcome::Updated) => stats.updated += 1,
                    Ok(IndexOutcome::Skipped) => stats.skipped += 1,
                    Err(e) => {
                        warn!("error indexing {}: {}", path.display(), e);
                        stats.errors += 1;
                    }
                }

                let _ = events
                    .send(ScanEvent::Progress {
                        processed: batch_start + offset + 1,
                        total: stats.total,
                        current: path.display().to_string(),
                    })
                    .await;
            }
        }

        if !stats.cancelled {
            match self.cleanup_removed_files().await {
                Ok(removed) => stats.removed = removed,
                Err(e) => warn!("cleanup pass failed: {}", e),
            }
        }

        info!(
            "scan complete: {} total, {} new, {} updated, {} skipped, {} errors",
            stats.total, stats.new, stats.updated, stats.skipped, stats.errors
        );
        stats
    }

    /// Index one file that is known to have a supported extension.
    async fn index_photo(&self, path: &Path) -> Result<IndexOutcome, StoreError> {
        let relative = path
            .strip_prefix(&self.settings.photos_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        let metadata = std::fs::metadata(path).map_err(io_to_store)?;
        let file_size = metadata.len() as i64;
        let file_modified = mtime_of(path);

        // Path known: size plus mtime (1 s tolerance) decide whether the
        // digest runs at all.
        if let Some(known_hash) = self.photos.hash_for_path(&relative).await? {
            if let Some(photo) = self.photos.get(&known_hash).await? {
                if photo.file_size == file_size {
                    let unchanged = match (photo.file_modified, file_modified) {
                        (Some(stored), Some(actual)) => {
                            (stored - actual).num_seconds().abs() < MTIME_TOLERANCE_SECS
                        }
                        _ => false,
                    };
                    if unchanged {
                        return Ok(IndexOutcome::Skipped);
                    }
                }
            }
        }

        let hash_path = path.to_path_buf();
        let file_hash = tokio::task::spawn_blocking(move || compute_file_hash(&hash_path))
            .await
            .map_err(|e| StoreError::QueryBuilderError(Box::new(e)))?
            .map_err(io_to_store)?;

        // Known content: just make sure the path association exists and the
        // primary path still resolves. Not handed to the pipeline; the
        // resume pass covers any unfinished stages.
        if let Some(existing) = self.photos.get(&file_hash).await? {
            if self.photos.path_known(&file_hash, &relative).await? {
                if let Some(modified) = file_modified {
                    self.photos.touch_modified(&file_hash, modified).await?;
                }
                return Ok(IndexOutcome::Skipped);
            }
            self.photos.add_path(&file_hash, &relative).await?;
            let old_primary = self.settings.photos_dir.join(&existing.file_path);
            if !old_primary.exists() {
                self.photos.set_primary_path(&file_hash, &relative).await?;
            }
            return Ok(IndexOutcome::Updated);
        }

        // New content.
        let mime_type = mime_guess::from_path(path).first().map(|m| m.to_string());

        let live_photo_video = find_live_photo_video(path).map(|video| {
            video
                .strip_prefix(&self.settings.photos_dir)
                .unwrap_or(&video)
                .to_string_lossy()
                .to_string()
        });
        let motion_photo = if live_photo_video.is_none() {
            let probe = path.to_path_buf();
            tokio::task::spawn_blocking(move || motion::detect_embedded_video(&probe))
                .await
                .map_err(|e| StoreError::QueryBuilderError(Box::new(e)))?
                .unwrap_or(false)
        } else {
            false
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.clone());

        self.photos
            .insert(&NewPhotoFile {
                file_hash: file_hash.clone(),
                file_path: relative,
                file_name,
                file_size,
                file_modified,
                mime_type,
                live_photo_video,
                motion_photo,
            })
            .await?;

        Ok(IndexOutcome::New { key: file_hash })
    }

    /// Index a single file from the watcher. Returns the content key when
    /// the file is new to the store.
    pub async fn index_single_file(&self, path: &Path) -> Option<String> {
        if !self.settings.is_supported_photo(path) {
            return None;
        }
        match self.index_photo(path).await {
            Ok(IndexOutcome::New { key }) => {
                info!("indexed new file: {} ({})", path.display(), key);
                Some(key)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("error indexing {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Remove records whose paths no longer exist on disk, then garbage-
    /// collect content records left without any path.
    async fn cleanup_removed_files(&self) -> Result<usize, StoreError> {
        let paths = self.photos.list_paths().await?;
        let mut removed = 0;

        for (file_hash, file_path) in paths {
            if self.settings.photos_dir.join(&file_path).exists() {
                continue;
            }
            self.photos.remove_path(&file_hash, &file_path).await?;
            removed += 1;
            if self.photos.path_count(&file_hash).await? == 0 {
                self.photos.delete_photo(&file_hash).await?;
            }
        }

        if removed > 0 {
            info!("cleaned up {} removed file paths", removed);
        }
        Ok(removed)
    }
}

fn io_to_store(e: std::io::Error) -> StoreError {
    StoreError::QueryBuilderError(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::repository::{migrations, Store};

    async fn setup(dir: &Path) -> (Scanner, Store, Arc<Settings>) {
        let photos_dir = dir.join("photos");
        let data_dir = dir.join("data");
        std::fs::create_dir_all(&photos_dir).unwrap();
        std::fs::create_dir_all(data_dir.join("db")).unwrap();

        let settings = Arc::new(Settings {
            photos_dir,
            data_dir: data_dir.clone(),
            ..Settings::default()
        });
        migrations::run_migrations(&settings.database_path().display().to_string())
            .await
            .unwrap();
        let store = Store::from_path(&settings.database_path());
        let scanner = Scanner::new(Arc::clone(&settings), store.photos());
        (scanner, store, settings)
    }

    fn never_cancel() -> Arc<dyn Fn() -> bool + Send + Sync> {
        Arc::new(|| false)
    }

    async fn run_scan(scanner: &Scanner) -> (ScanStats, Vec<ScanEvent>) {
        let (tx, mut rx) = mpsc::channel(256);
        let stats = scanner.scan(tx, never_cancel()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (stats, events)
    }

    #[tokio::test]
    async fn new_files_are_indexed_and_discovered() {
        let dir = tempdir().unwrap();
        let (scanner, store, settings) = setup(dir.path()).await;
        std::fs::write(settings.photos_dir.join("a.jpg"), b"jpeg-bytes").unwrap();
        std::fs::write(settings.photos_dir.join("notes.txt"), b"ignored").unwrap();

        let (stats, events) = run_scan(&scanner).await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.new, 1);

        let discovered: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Discovered { .. }))
            .collect();
        assert_eq!(discovered.len(), 1);

        let expected_key = compute_file_hash(&settings.photos_dir.join("a.jpg")).unwrap();
        let photo = store.photos().get(&expected_key).await.unwrap().unwrap();
        assert_eq!(photo.file_path, "a.jpg");
        assert_eq!(photo.file_size, 10);
        assert!(!photo.motion_photo);
    }

    #[tokio::test]
    async fn unchanged_files_are_skipped_on_rescan() {
        let dir = tempdir().unwrap();
        let (scanner, _store, settings) = setup(dir.path()).await;
        std::fs::write(settings.photos_dir.join("a.jpg"), b"jpeg-bytes").unwrap();

        let (first, _) = run_scan(&scanner).await;
        assert_eq!(first.new, 1);

        let (second, events) = run_scan(&scanner).await;
        assert_eq!(second.new, 0);
        assert_eq!(second.skipped, 1);
        assert!(events
            .iter()
            .all(|e| !matches!(e, ScanEvent::Discovered { .. })));
    }

    #[tokio::test]
    async fn same_content_under_new_path_registers_without_discovery() {
        let dir = tempdir().unwrap();
        let (scanner, store, settings) = setup(dir.path()).await;
        std::fs::write(settings.photos_dir.join("a.jpg"), b"same-bytes").unwrap();

        let (first, _) = run_scan(&scanner).await;
        assert_eq!(first.new, 1);

        std::fs::write(settings.photos_dir.join("copy.jpg"), b"same-bytes").unwrap();
        let (second, events) = run_scan(&scanner).await;
        assert_eq!(second.new, 0);
        assert_eq!(second.updated, 1);
        assert!(events
            .iter()
            .all(|e| !matches!(e, ScanEvent::Discovered { .. })));

        let key = compute_file_hash(&settings.photos_dir.join("a.jpg")).unwrap();
        assert_eq!(store.photos().path_count(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deleted_files_are_garbage_collected() {
        let dir = tempdir().unwrap();
        let (scanner, store, settings) = setup(dir.path()).await;
        let path = settings.photos_dir.join("a.jpg");
        std::fs::write(&path, b"jpeg-bytes").unwrap();
        let key = compute_file_hash(&path).unwrap();

        run_scan(&scanner).await;
        assert!(store.photos().get(&key).await.unwrap().is_some());

        std::fs::remove_file(&path).unwrap();
        let (stats, _) = run_scan(&scanner).await;
        assert_eq!(stats.removed, 1);
        assert!(store.photos().get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn jpeg_with_embedded_mp4_marker_is_flagged_motion() {
        let dir = tempdir().unwrap();
        let (scanner, store, settings) = setup(dir.path()).await;
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.resize(2048, 0);
        bytes.extend_from_slice(&[0, 0, 0, 24]);
        bytes.extend_from_slice(b"ftypmp42");
        bytes.extend_from_slice(&[0u8; 64]);
        let path = settings.photos_dir.join("motion.jpg");
        std::fs::write(&path, &bytes).unwrap();

        run_scan(&scanner).await;
        let key = compute_file_hash(&path).unwrap();
        let photo = store.photos().get(&key).await.unwrap().unwrap();
        assert!(photo.motion_photo);
    }

    #[tokio::test]
    async fn live_photo_companion_wins_over_signature_scan() {
        let dir = tempdir().unwrap();
        let (scanner, store, settings) = setup(dir.path()).await;
        std::fs::write(settings.photos_dir.join("live.jpg"), b"live-photo").unwrap();
        std::fs::write(settings.photos_dir.join("live.mov"), b"mov-bytes").unwrap();

        run_scan(&scanner).await;
        let key = compute_file_hash(&settings.photos_dir.join("live.jpg")).unwrap();
        let photo = store.photos().get(&key).await.unwrap().unwrap();
        assert_eq!(photo.live_photo_video.as_deref(), Some("live.mov"));
        assert!(!photo.motion_photo);
    }
}
