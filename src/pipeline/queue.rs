//! Per-stage bounded FIFO with dedup sets and counters.
//!
//! A key lives in at most one of {channel, processing, processed}. The
//! `processed` set is the in-process restart-safety lever: once a stage has
//! finalized a key, re-admission is a counted no-op. Across restarts the
//! equivalent guard is the persistent completion flag checked by the worker.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use super::stage::Stage;

/// Default channel capacity per stage.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// How long admission waits on a full channel before reporting `Full`.
const ADMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of admitting a key into a stage queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// The stage already finalized this key in this process lifetime.
    DuplicateProcessed,
    /// The key is already queued or held by a worker.
    DuplicateInFlight,
    /// The channel stayed full for the admission timeout.
    Full,
}

/// Terminal outcome for a key at one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed,
}

/// Counter snapshot for one stage queue.
#[derive(Debug, Clone, Serialize)]
pub struct StageCounters {
    pub stage: Stage,
    pub pending: usize,
    pub in_flight: usize,
    pub completed_total: u64,
    pub failed_total: u64,
    pub skipped_total: u64,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub current_key: Option<String>,
    pub current_path: Option<String>,
}

#[derive(Default)]
struct QueueInner {
    queued: HashSet<String>,
    processing: HashSet<String>,
    processed: HashSet<String>,
    pending: usize,
    completed_total: u64,
    failed_total: u64,
    skipped_total: u64,
    last_finished_at: Option<DateTime<Utc>>,
    current_key: Option<String>,
    current_path: Option<String>,
}

/// Bounded in-memory FIFO of item keys for one stage.
pub struct StageQueue {
    stage: Stage,
    tx: mpsc::Sender<String>,
    rx: AsyncMutex<mpsc::Receiver<String>>,
    inner: Mutex<QueueInner>,
}

impl StageQueue {
    pub fn new(stage: Stage) -> Self {
        Self::with_capacity(stage, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(stage: Stage, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            stage,
            tx,
            rx: AsyncMutex::new(rx),
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Admit a key. The duplicate check and the enqueue are atomic with
    /// respect to other admissions: the key is reserved in `queued` before
    /// the channel send, and released again if the channel stays full.
    pub async fn admit(&self, key: &str) -> Admission {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.processed.contains(key) {
                inner.skipped_total += 1;
                return Admission::DuplicateProcessed;
            }
            if inner.processing.contains(key) || inner.queued.contains(key) {
                return Admission::DuplicateInFlight;
            }
            inner.queued.insert(key.to_string());
        }

        match self.tx.send_timeout(key.to_string(), ADMIT_TIMEOUT).await {
            Ok(()) => {
                let mut inner = self.inner.lock().unwrap();
                inner.pending += 1;
                Admission::Accepted
            }
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.queued.remove(key);
                Admission::Full
            }
        }
    }

    /// Take the next key, waiting at most `timeout`. Returns `None` on
    /// timeout so callers can observe their stop flag.
    pub async fn take(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(key)) => {
                drop(rx);
                let mut inner = self.inner.lock().unwrap();
                inner.queued.remove(&key);
                inner.pending = inner.pending.saturating_sub(1);
                inner.processing.insert(key.clone());
                Some(key)
            }
            _ => None,
        }
    }

    /// Finalize a key held by a worker. Both outcomes are terminal for
    /// routing purposes.
    pub fn finish(&self, key: &str, outcome: StageOutcome) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        inner.processed.insert(key.to_string());
        match outcome {
            StageOutcome::Completed => inner.completed_total += 1,
            StageOutcome::Failed => inner.failed_total += 1,
        }
        inner.last_finished_at = Some(Utc::now());
        if inner.current_key.as_deref() == Some(key) {
            inner.current_key = None;
            inner.current_path = None;
        }
    }

    /// Record the key/path a worker is currently handling, for telemetry.
    pub fn mark_active(&self, key: &str, path: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_key = Some(key.to_string());
        inner.current_path = path.map(|p| p.to_string());
    }

    /// Whether this queue already knows the key (queued, held, or done).
    pub fn is_tracked(&self, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.queued.contains(key) || inner.processing.contains(key) || inner.processed.contains(key)
    }

    /// Zero pending and zero in flight.
    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.pending == 0 && inner.processing.is_empty()
    }

    /// Drop the processed set (diagnostic); returns how many were cleared.
    pub fn clear_processed(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.processed.len();
        inner.processed.clear();
        count
    }

    /// Clear dedup sets and counters for a fresh rescan. Keys still in the
    /// channel survive; workers will finalize them against the persistent
    /// flags.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queued.clear();
        inner.processing.clear();
        inner.processed.clear();
        inner.pending = 0;
        inner.completed_total = 0;
        inner.failed_total = 0;
        inner.skipped_total = 0;
        inner.last_finished_at = None;
        inner.current_key = None;
        inner.current_path = None;
    }

    pub fn snapshot(&self) -> StageCounters {
        let inner = self.inner.lock().unwrap();
        StageCounters {
            stage: self.stage,
            pending: inner.pending,
            in_flight: inner.processing.len(),
            completed_total: inner.completed_total,
            failed_total: inner.failed_total,
            skipped_total: inner.skipped_total,
            last_finished_at: inner.last_finished_at,
            current_key: inner.current_key.clone(),
            current_path: inner.current_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAKE: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn admit_take_finish_accounting() {
        let queue = StageQueue::new(Stage::Exif);

        assert_eq!(queue.admit("k1").await, Admission::Accepted);
        assert_eq!(queue.admit("k2").await, Admission::Accepted);
        let snap = queue.snapshot();
        assert_eq!(snap.pending, 2);
        assert_eq!(snap.in_flight, 0);

        let key = queue.take(TAKE).await.unwrap();
        assert_eq!(key, "k1");
        let snap = queue.snapshot();
        assert_eq!(snap.pending, 1);
        assert_eq!(snap.in_flight, 1);

        queue.finish(&key, StageOutcome::Completed);
        let snap = queue.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.completed_total, 1);
        assert!(snap.last_finished_at.is_some());
    }

    #[tokio::test]
    async fn processed_keys_are_skipped() {
        let queue = StageQueue::new(Stage::Hashing);
        queue.admit("k").await;
        let key = queue.take(TAKE).await.unwrap();
        queue.finish(&key, StageOutcome::Failed);

        assert_eq!(queue.admit("k").await, Admission::DuplicateProcessed);
        let snap = queue.snapshot();
        assert_eq!(snap.skipped_total, 1);
        assert_eq!(snap.failed_total, 1);
    }

    #[tokio::test]
    async fn in_flight_keys_are_rejected_without_counting() {
        let queue = StageQueue::new(Stage::Faces);
        queue.admit("k").await;
        assert_eq!(queue.admit("k").await, Admission::DuplicateInFlight);

        let key = queue.take(TAKE).await.unwrap();
        assert_eq!(queue.admit("k").await, Admission::DuplicateInFlight);
        queue.finish(&key, StageOutcome::Completed);
        assert_eq!(queue.snapshot().skipped_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_reports_full_and_leaves_state_unchanged() {
        let queue = StageQueue::with_capacity(Stage::Captioning, 1);
        assert_eq!(queue.admit("a").await, Admission::Accepted);
        assert_eq!(queue.admit("b").await, Admission::Full);

        // The rejected key is not left reserved.
        assert!(!queue.is_tracked("b"));
        assert_eq!(queue.snapshot().pending, 1);
        assert_eq!(queue.admit("b").await, Admission::Full);
    }

    #[tokio::test]
    async fn take_times_out_on_empty_queue() {
        let queue = StageQueue::new(Stage::Motion);
        assert!(queue.take(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn current_key_cleared_only_for_matching_finish() {
        let queue = StageQueue::new(Stage::Thumbnails);
        queue.admit("a").await;
        queue.admit("b").await;
        let a = queue.take(TAKE).await.unwrap();
        let b = queue.take(TAKE).await.unwrap();
        queue.mark_active(&b, Some("/photos/b.jpg"));

        queue.finish(&a, StageOutcome::Completed);
        let snap = queue.snapshot();
        assert_eq!(snap.current_key.as_deref(), Some("b"));

        queue.finish(&b, StageOutcome::Completed);
        assert!(queue.snapshot().current_key.is_none());
    }

    #[tokio::test]
    async fn reset_clears_dedup_state() {
        let queue = StageQueue::new(Stage::Geocoding);
        queue.admit("k").await;
        let key = queue.take(TAKE).await.unwrap();
        queue.finish(&key, StageOutcome::Completed);

        queue.reset();
        assert!(!queue.is_tracked("k"));
        assert_eq!(queue.snapshot().completed_total, 0);
        assert_eq!(queue.admit("k").await, Admission::Accepted);
    }
}
