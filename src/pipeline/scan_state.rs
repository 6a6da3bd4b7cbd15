//! Shared scan state for progress reporting.
//!
//! Mutations are pushed to subscribers immediately; the websocket layer
//! adds a heartbeat floor on top.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

/// Scan-state snapshot, broadcast on every change.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSnapshot {
    pub is_scanning: bool,
    pub cancel_requested: bool,
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub phase: Option<String>,
    pub phase_progress: usize,
    pub phase_total: usize,
}

impl Default for ScanSnapshot {
    fn default() -> Self {
        Self {
            is_scanning: false,
            cancel_requested: false,
            total_files: 0,
            processed_files: 0,
            current_file: None,
            phase: None,
            phase_progress: 0,
            phase_total: 0,
        }
    }
}

/// Shared scan state with change notifications.
pub struct ScanState {
    inner: Mutex<ScanSnapshot>,
    tx: broadcast::Sender<ScanSnapshot>,
}

impl ScanState {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(ScanSnapshot::default()),
            tx,
        }
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.inner.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanSnapshot> {
        self.tx.subscribe()
    }

    fn notify(&self, snapshot: ScanSnapshot) {
        // Dropped receivers are fine; nobody may be listening.
        let _ = self.tx.send(snapshot);
    }

    /// Claim the scanning slot. Returns false if a scan is already running.
    pub fn begin_scan(&self) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            if inner.is_scanning {
                return false;
            }
            *inner = ScanSnapshot {
                is_scanning: true,
                phase: Some("discovery".to_string()),
                ..ScanSnapshot::default()
            };
            inner.clone()
        };
        self.notify(snapshot);
        true
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.lock().unwrap().is_scanning
    }

    /// Ask the running scan to stop between batches. Returns false when no
    /// scan is running.
    pub fn request_cancel(&self) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.is_scanning {
                return false;
            }
            inner.cancel_requested = true;
            inner.clone()
        };
        self.notify(snapshot);
        true
    }

    pub fn cancel_requested(&self) -> bool {
        self.inner.lock().unwrap().cancel_requested
    }

    /// Record walk progress.
    pub fn progress(&self, processed: usize, total: usize, current_file: &str) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.processed_files = processed;
            inner.total_files = total;
            inner.current_file = Some(current_file.to_string());
            inner.phase_progress = processed;
            inner.phase_total = total.max(1);
            inner.clone()
        };
        self.notify(snapshot);
    }

    /// Release the scanning slot and clear transient fields.
    pub fn finish_scan(&self) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.is_scanning = false;
            inner.phase = None;
            inner.current_file = None;
            inner.phase_progress = 0;
            inner.phase_total = 0;
            inner.clone()
        };
        self.notify(snapshot);
    }
}

impl Default for ScanState {
    fn default() -> Self {
        Self::new()
    }
}
