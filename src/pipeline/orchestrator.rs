//! Pipeline orchestrator: owns the stage queues, the topology, and the
//! global counters. Workers and producers talk to queues only through this
//! type; item payloads never pass through it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::queue::{Admission, StageCounters, StageQueue};
use super::stage::Stage;

/// Coarse pipeline state derived from the queue gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Idle,
    Processing,
    Done,
}

/// Full pipeline statistics, broadcast to telemetry subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub is_running: bool,
    pub status: PipelineStatus,
    pub total_files_discovered: u64,
    pub total_files_completed: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
    pub queues: BTreeMap<Stage, StageCounters>,
    pub flow: BTreeMap<Stage, Vec<Stage>>,
}

#[derive(Default)]
struct Timeline {
    start: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
}

/// The DAG of stages plus the queues that feed them.
pub struct Pipeline {
    queues: BTreeMap<Stage, Arc<StageQueue>>,
    flow: BTreeMap<Stage, Vec<Stage>>,
    total_discovered: AtomicU64,
    is_running: AtomicBool,
    timeline: Mutex<Timeline>,
}

fn default_flow() -> BTreeMap<Stage, Vec<Stage>> {
    BTreeMap::from([
        (Stage::Discovery, vec![Stage::Exif]),
        (Stage::Exif, vec![Stage::Geocoding]),
        (Stage::Geocoding, vec![Stage::Thumbnails]),
        (Stage::Thumbnails, vec![Stage::Motion]),
        (Stage::Motion, vec![Stage::Hashing]),
        (Stage::Hashing, vec![Stage::Faces]),
        (Stage::Faces, vec![Stage::Captioning]),
        (Stage::Captioning, vec![Stage::Events]),
        (Stage::Events, vec![]),
    ])
}

impl Pipeline {
    pub fn new() -> Self {
        let queues = Stage::ALL
            .iter()
            .map(|&stage| (stage, Arc::new(StageQueue::new(stage))))
            .collect();
        Self {
            queues,
            flow: default_flow(),
            total_discovered: AtomicU64::new(0),
            is_running: AtomicBool::new(false),
            timeline: Mutex::new(Timeline::default()),
        }
    }

    pub fn queue(&self, stage: Stage) -> Arc<StageQueue> {
        Arc::clone(&self.queues[&stage])
    }

    pub fn successors(&self, stage: Stage) -> &[Stage] {
        self.flow.get(&stage).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Admit a newly discovered file into the first stage.
    pub async fn add_file(&self, key: &str, path: &str) -> Admission {
        self.total_discovered.fetch_add(1, Ordering::Relaxed);
        debug!(key, path, "admitting discovered file");
        self.queues[&Stage::Discovery].admit(key).await
    }

    /// Route a finished key into every successor stage. Admission failures
    /// are absorbed: duplicates mean the work is already covered, and a
    /// full successor will pick the item up on the next rescan.
    pub async fn route_next(&self, key: &str, from: Stage) {
        for &next in self.successors(from) {
            match self.queues[&next].admit(key).await {
                Admission::Accepted => {}
                Admission::Full => {
                    debug!(key, stage = %next, "successor queue full, dropping routing")
                }
                Admission::DuplicateProcessed | Admission::DuplicateInFlight => {}
            }
        }
    }

    /// Record that workers are up and the pipeline clock is running.
    pub fn mark_started(&self) {
        self.is_running.store(true, Ordering::Relaxed);
        let mut timeline = self.timeline.lock().unwrap();
        if timeline.start.is_none() {
            timeline.start = Some(Utc::now());
        }
    }

    pub fn mark_stopped(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub fn total_discovered(&self) -> u64 {
        self.total_discovered.load(Ordering::Relaxed)
    }

    /// Zero pending and zero in flight across every stage.
    pub fn is_quiescent(&self) -> bool {
        self.queues.values().all(|q| q.is_quiescent())
    }

    /// Whether any stage upstream of `stage` still has work.
    pub fn upstream_busy(&self, stage: Stage) -> bool {
        self.queues
            .iter()
            .filter(|(&s, _)| s != stage)
            .any(|(_, q)| !q.is_quiescent())
    }

    /// Snapshot all counters; latches `completed_at` on quiescence and
    /// clears it when new work arrives.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let now = Utc::now();
        let discovered = self.total_discovered();
        let is_idle = self.is_quiescent();

        let mut timeline = self.timeline.lock().unwrap();
        if is_idle && discovered > 0 {
            if timeline.completed.is_none() {
                timeline.completed = Some(now);
            }
        } else {
            timeline.completed = None;
        }

        let status = if discovered == 0 {
            PipelineStatus::Idle
        } else if is_idle {
            PipelineStatus::Done
        } else {
            PipelineStatus::Processing
        };

        let uptime_seconds = match (timeline.start, timeline.completed) {
            (None, _) => 0.0,
            (Some(start), Some(completed)) => {
                (completed - start).num_milliseconds() as f64 / 1000.0
            }
            (Some(start), None) => (now - start).num_milliseconds() as f64 / 1000.0,
        };

        PipelineSnapshot {
            is_running: self.is_running.load(Ordering::Relaxed),
            status,
            total_files_discovered: discovered,
            total_files_completed: self.queues[&Stage::Events].snapshot().completed_total,
            start_time: timeline.start,
            completed_at: timeline.completed,
            uptime_seconds,
            queues: self
                .queues
                .iter()
                .map(|(&stage, queue)| (stage, queue.snapshot()))
                .collect(),
            flow: self.flow.clone(),
        }
    }

    /// Clear per-stage dedup state and global counters before a fresh
    /// rescan, so stale in-process dedup cannot mask rework. The persistent
    /// completion flags still short-circuit the enrichers.
    pub fn reset(&self) {
        for queue in self.queues.values() {
            queue.reset();
        }
        self.total_discovered.store(0, Ordering::Relaxed);
        self.timeline.lock().unwrap().completed = None;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::pipeline::queue::StageOutcome;

    #[tokio::test]
    async fn add_file_lands_in_discovery() {
        let pipeline = Pipeline::new();
        assert_eq!(pipeline.add_file("k", "/photos/a.jpg").await, Admission::Accepted);
        assert_eq!(pipeline.total_discovered(), 1);
        assert_eq!(pipeline.queue(Stage::Discovery).snapshot().pending, 1);
    }

    #[tokio::test]
    async fn route_next_feeds_all_successors() {
        let pipeline = Pipeline::new();
        pipeline.route_next("k", Stage::Discovery).await;
        assert_eq!(pipeline.queue(Stage::Exif).snapshot().pending, 1);

        // Terminal stage has no successors.
        pipeline.route_next("k", Stage::Events).await;
        for stage in Stage::ALL {
            if stage != Stage::Exif {
                assert_eq!(pipeline.queue(stage).snapshot().pending, 0);
            }
        }
    }

    #[tokio::test]
    async fn item_reaches_successor_only_after_predecessor_finalizes() {
        let pipeline = Pipeline::new();
        pipeline.add_file("k", "/p/a.jpg").await;

        let discovery = pipeline.queue(Stage::Discovery);
        let key = discovery.take(Duration::from_millis(100)).await.unwrap();
        assert_eq!(pipeline.queue(Stage::Exif).snapshot().pending, 0);

        discovery.finish(&key, StageOutcome::Completed);
        pipeline.route_next(&key, Stage::Discovery).await;
        assert_eq!(pipeline.queue(Stage::Exif).snapshot().pending, 1);
    }

    #[tokio::test]
    async fn status_transitions_and_completion_latching() {
        let pipeline = Pipeline::new();
        pipeline.mark_started();
        assert_eq!(pipeline.snapshot().status, PipelineStatus::Idle);

        pipeline.add_file("k", "/p/a.jpg").await;
        assert_eq!(pipeline.snapshot().status, PipelineStatus::Processing);
        assert!(pipeline.snapshot().completed_at.is_none());

        // Drain the single item through to quiescence.
        let discovery = pipeline.queue(Stage::Discovery);
        let key = discovery.take(Duration::from_millis(100)).await.unwrap();
        discovery.finish(&key, StageOutcome::Completed);

        let snap = pipeline.snapshot();
        assert_eq!(snap.status, PipelineStatus::Done);
        let completed_at = snap.completed_at.unwrap();

        // Completion time stays latched while quiescent.
        let again = pipeline.snapshot();
        assert_eq!(again.completed_at, Some(completed_at));

        // New work clears it.
        pipeline.add_file("k2", "/p/b.jpg").await;
        assert!(pipeline.snapshot().completed_at.is_none());
    }

    #[tokio::test]
    async fn reset_clears_counters_and_dedup() {
        let pipeline = Pipeline::new();
        pipeline.add_file("k", "/p/a.jpg").await;
        let discovery = pipeline.queue(Stage::Discovery);
        let key = discovery.take(Duration::from_millis(100)).await.unwrap();
        discovery.finish(&key, StageOutcome::Completed);

        pipeline.reset();
        assert_eq!(pipeline.total_discovered(), 0);
        assert_eq!(pipeline.queue(Stage::Discovery).snapshot().completed_total, 0);
        assert_eq!(pipeline.add_file("k", "/p/a.jpg").await, Admission::Accepted);
    }

    #[tokio::test]
    async fn upstream_busy_ignores_the_terminal_stage_itself() {
        let pipeline = Pipeline::new();
        assert!(!pipeline.upstream_busy(Stage::Events));

        pipeline.queue(Stage::Events).admit("k").await;
        assert!(!pipeline.upstream_busy(Stage::Events));

        pipeline.queue(Stage::Hashing).admit("k").await;
        assert!(pipeline.upstream_busy(Stage::Events));
    }
}
