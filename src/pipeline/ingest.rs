//! Scan and resume orchestration: drives the directory scanner, feeds
//! discovered keys into the pipeline, and re-admits items whose stages
//! were left unfinished by a previous process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::orchestrator::Pipeline;
use super::scan_state::ScanState;
use crate::config::Settings;
use crate::repository::{PhotoRepository, Store, StoreError};
use crate::services::{ScanEvent, ScanStats, Scanner};

/// Pause between resume batches so workers make progress and memory stays
/// bounded.
const RESUME_BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Scan/resume producer facade shared by the server and the CLI.
#[derive(Clone)]
pub struct Ingest {
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
    scan_state: Arc<ScanState>,
    scanner: Scanner,
    photos: PhotoRepository,
    store: Store,
}

impl Ingest {
    pub fn new(
        settings: Arc<Settings>,
        pipeline: Arc<Pipeline>,
        scan_state: Arc<ScanState>,
        store: Store,
    ) -> Self {
        let scanner = Scanner::new(Arc::clone(&settings), store.photos());
        let photos = store.photos();
        Self {
            settings,
            pipeline,
            scan_state,
            scanner,
            photos,
            store,
        }
    }

    pub fn scanner(&self) -> Scanner {
        self.scanner.clone()
    }

    pub fn scan_state(&self) -> Arc<ScanState> {
        Arc::clone(&self.scan_state)
    }

    /// Claim the scan slot and run a full scan in the background. Returns
    /// false when a scan is already running.
    pub fn try_start_scan(&self) -> bool {
        if !self.scan_state.begin_scan() {
            return false;
        }
        let ingest = self.clone();
        tokio::spawn(async move {
            ingest.run_claimed_scan().await;
        });
        true
    }

    /// Run a full scan in the foreground (CLI path). Returns `None` when a
    /// scan is already running.
    pub async fn run_scan(&self) -> Option<ScanStats> {
        if !self.scan_state.begin_scan() {
            return None;
        }
        Some(self.run_claimed_scan().await)
    }

    /// The scan body; the caller must already hold the scan slot.
    async fn run_claimed_scan(&self) -> ScanStats {
        // Fresh scans drop per-process dedup so rework is not masked; the
        // persistent flags still short-circuit each enricher.
        self.pipeline.reset();

        let (tx, mut rx) = mpsc::channel::<ScanEvent>(256);
        let scan_state = Arc::clone(&self.scan_state);
        let cancel: Arc<dyn Fn() -> bool + Send + Sync> = {
            let scan_state = Arc::clone(&self.scan_state);
            Arc::new(move || scan_state.cancel_requested())
        };

        let scanner = self.scanner.clone();
        let walk = tokio::spawn(async move { scanner.scan(tx, cancel).await });

        while let Some(event) = rx.recv().await {
            match event {
                ScanEvent::Progress {
                    processed,
                    total,
                    current,
                } => scan_state.progress(processed, total, &current),
                ScanEvent::Discovered { key, path } => {
                    self.pipeline.add_file(&key, &path).await;
                }
            }
        }

        let stats = match walk.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("scan task panicked: {}", e);
                ScanStats::default()
            }
        };

        // Pick up items indexed in a prior run whose stages never
        // finished; the scan itself only admits new content.
        let resumed = self.resume_incomplete().await.unwrap_or_else(|e| {
            warn!("resume pass failed: {}", e);
            0
        });
        if resumed > 0 {
            info!("resumed {} partially-processed files", resumed);
        }

        self.scan_state.finish_scan();
        stats
    }

    /// Re-admit items missing any completion flag, in batches with a yield
    /// between them.
    pub async fn resume_incomplete(&self) -> Result<usize, StoreError> {
        let incomplete = self.photos.incomplete().await?;
        if incomplete.is_empty() {
            return Ok(0);
        }

        let discovery = self.pipeline.queue(super::stage::Stage::Discovery);
        let batch_size = self.settings.batch_size.max(1);
        let mut resumed = 0;

        for batch in incomplete.chunks(batch_size) {
            for (key, relative_path) in batch {
                if discovery.is_tracked(key) {
                    continue;
                }
                let full_path = self.settings.photos_dir.join(relative_path);
                if !full_path.exists() {
                    continue;
                }
                self.pipeline
                    .add_file(key, &full_path.display().to_string())
                    .await;
                resumed += 1;
            }
            tokio::time::sleep(RESUME_BATCH_PAUSE).await;
        }

        Ok(resumed)
    }

    /// Request cancellation of the running scan.
    pub fn cancel_scan(&self) -> bool {
        self.scan_state.request_cancel()
    }

    /// Delete every persistent record and reset the orchestrator. Refused
    /// while a scan is running.
    pub async fn clear_index(&self) -> Result<bool, StoreError> {
        if self.scan_state.is_scanning() {
            return Ok(false);
        }
        self.store.clear_index().await?;
        self.pipeline.reset();
        info!("index cleared");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use tempfile::tempdir;

    use crate::pipeline::Stage;
    use crate::repository::{migrations, NewPhotoFile};

    async fn setup(dir: &Path) -> (Arc<Ingest>, Arc<Pipeline>, Store, Arc<Settings>) {
        let photos_dir = dir.join("photos");
        let data_dir = dir.join("data");
        std::fs::create_dir_all(&photos_dir).unwrap();
        std::fs::create_dir_all(data_dir.join("db")).unwrap();

        let settings = Arc::new(Settings {
            photos_dir,
            data_dir,
            ..Settings::default()
        });
        migrations::run_migrations(&settings.database_path().display().to_string())
            .await
            .unwrap();
        let store = Store::from_path(&settings.database_path());
        let pipeline = Arc::new(Pipeline::new());
        let scan_state = Arc::new(ScanState::new());
        let ingest = Arc::new(Ingest::new(
            Arc::clone(&settings),
            Arc::clone(&pipeline),
            scan_state,
            store.clone(),
        ));
        (ingest, pipeline, store, settings)
    }

    #[tokio::test]
    async fn scan_admits_new_files_into_discovery() {
        let dir = tempdir().unwrap();
        let (ingest, pipeline, _store, settings) = setup(dir.path()).await;
        std::fs::write(settings.photos_dir.join("a.jpg"), b"bytes-a").unwrap();
        std::fs::write(settings.photos_dir.join("b.jpg"), b"bytes-b").unwrap();

        let stats = ingest.run_scan().await.unwrap();
        assert_eq!(stats.new, 2);
        assert_eq!(pipeline.total_discovered(), 2);
        assert_eq!(pipeline.queue(Stage::Discovery).snapshot().pending, 2);
    }

    #[tokio::test]
    async fn resume_readmits_only_incomplete_existing_files() {
        let dir = tempdir().unwrap();
        let (ingest, pipeline, store, settings) = setup(dir.path()).await;

        std::fs::write(settings.photos_dir.join("kept.jpg"), b"kept").unwrap();
        let photos = store.photos();
        photos
            .insert(&NewPhotoFile {
                file_hash: "kept".to_string(),
                file_path: "kept.jpg".to_string(),
                file_name: "kept.jpg".to_string(),
                file_size: 4,
                file_modified: None,
                mime_type: None,
                live_photo_video: None,
                motion_photo: false,
            })
            .await
            .unwrap();
        photos
            .insert(&NewPhotoFile {
                file_hash: "gone".to_string(),
                file_path: "gone.jpg".to_string(),
                file_name: "gone.jpg".to_string(),
                file_size: 4,
                file_modified: None,
                mime_type: None,
                live_photo_video: None,
                motion_photo: false,
            })
            .await
            .unwrap();

        // A completed photo must not be re-admitted.
        photos
            .insert(&NewPhotoFile {
                file_hash: "done".to_string(),
                file_path: "done.jpg".to_string(),
                file_name: "done.jpg".to_string(),
                file_size: 4,
                file_modified: None,
                mime_type: None,
                live_photo_video: None,
                motion_photo: false,
            })
            .await
            .unwrap();
        std::fs::write(settings.photos_dir.join("done.jpg"), b"done").unwrap();
        photos.apply_exif("done", &Default::default()).await.unwrap();
        photos.mark_thumbnail_generated("done").await.unwrap();
        photos.mark_perceptual_hashed("done").await.unwrap();
        photos.mark_faces_detected("done").await.unwrap();
        photos.mark_captioned("done").await.unwrap();

        let resumed = ingest.resume_incomplete().await.unwrap();
        assert_eq!(resumed, 1);
        assert_eq!(pipeline.queue(Stage::Discovery).snapshot().pending, 1);
    }

    #[tokio::test]
    async fn clear_index_is_refused_while_scanning() {
        let dir = tempdir().unwrap();
        let (ingest, _pipeline, store, _settings) = setup(dir.path()).await;

        assert!(ingest.scan_state().begin_scan());
        assert!(!ingest.clear_index().await.unwrap());
        ingest.scan_state().finish_scan();
        assert!(ingest.clear_index().await.unwrap());
        assert_eq!(store.photos().count().await.unwrap(), 0);
    }
}
