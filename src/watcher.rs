//! Filesystem watcher: feeds created and modified photos into the
//! pipeline as they appear.
//!
//! Notify callbacks arrive on the watcher's own thread; paths are
//! marshalled into the runtime through an unbounded channel and debounced
//! so half-written files settle before indexing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::pipeline::Pipeline;
use crate::services::Scanner;

/// Settle time before a changed file is indexed.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Idle receive timeout; lets the loop notice a closed channel promptly.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Running watcher handle. Dropping it stops the underlying watcher.
pub struct PhotoWatcher {
    _watcher: RecommendedWatcher,
}

/// Start watching the photo tree. Returns `None` when the photos
/// directory does not exist.
pub fn start_watcher(
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
    scanner: Scanner,
) -> Option<PhotoWatcher> {
    let photos_dir = settings.photos_dir.clone();
    if !photos_dir.exists() {
        error!("photos directory does not exist: {}", photos_dir.display());
        return None;
    }

    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    let filter_settings = Arc::clone(&settings);
    let mut watcher = match notify::recommended_watcher(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if filter_settings.is_supported_photo(&path) {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => warn!("watch error: {}", e),
        },
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("failed to create filesystem watcher: {}", e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(&photos_dir, RecursiveMode::Recursive) {
        error!("failed to watch {}: {}", photos_dir.display(), e);
        return None;
    }

    info!("file watcher started for {}", photos_dir.display());
    tokio::spawn(process_file_events(rx, pipeline, scanner));

    Some(PhotoWatcher { _watcher: watcher })
}

/// Consume watcher events: debounce, index through the same single-file
/// path discovery uses, then admit into the pipeline.
async fn process_file_events(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    pipeline: Arc<Pipeline>,
    scanner: Scanner,
) {
    loop {
        let path = match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
            Ok(Some(path)) => path,
            Ok(None) => break,
            Err(_) => continue,
        };

        // Wait for writes to settle.
        tokio::time::sleep(DEBOUNCE).await;

        info!("detected file change: {}", path.display());
        if let Some(key) = scanner.index_single_file(&path).await {
            pipeline.add_file(&key, &path.display().to_string()).await;
        }
    }
}
