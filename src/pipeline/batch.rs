//! Batch coordinator for the terminal EVENTS stage.
//!
//! Whole-corpus recomputation is wasteful per item, so the coordinator
//! waits for a coherent burst of finished items, drains its queue, waits
//! for upstream quiescence (bounded, so a stalled stage cannot wedge the
//! batch forever), then runs face clustering and event detection in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::orchestrator::Pipeline;
use super::queue::StageOutcome;
use super::stage::Stage;
use super::worker::CorpusPass;

const PENDING_POLL: Duration = Duration::from_secs(2);
const DEBOUNCE: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const QUIESCENCE_POLL: Duration = Duration::from_secs(5);
const MAX_QUIESCENCE_WAITS: u32 = 60;

/// The one logical worker for the EVENTS stage.
pub struct EventsCoordinator {
    pipeline: Arc<Pipeline>,
    face_clustering: Arc<dyn CorpusPass>,
    event_detection: Arc<dyn CorpusPass>,
    stop: Arc<AtomicBool>,
}

impl EventsCoordinator {
    pub fn new(
        pipeline: Arc<Pipeline>,
        face_clustering: Arc<dyn CorpusPass>,
        event_detection: Arc<dyn CorpusPass>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            face_clustering,
            event_detection,
            stop,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Drain all currently pending items from the EVENTS queue, marking
    /// each one completed.
    async fn drain(&self) -> usize {
        let queue = self.pipeline.queue(Stage::Events);
        let mut drained = 0;
        while let Some(key) = queue.take(DRAIN_TIMEOUT).await {
            queue.finish(&key, StageOutcome::Completed);
            drained += 1;
        }
        drained
    }

    async fn run_batch_ops(&self) {
        match self.face_clustering.run().await {
            Ok(n) => info!("face clustering completed: {} new persons", n),
            Err(e) => error!("face clustering failed: {}", e),
        }
        match self.event_detection.run().await {
            Ok(n) => info!("event detection completed: {} events", n),
            Err(e) => error!("event detection failed: {}", e),
        }
    }

    pub async fn run(self) {
        info!("events coordinator started");
        let queue = self.pipeline.queue(Stage::Events);

        while !self.stopped() {
            // Wait for finished items to arrive at the terminal stage.
            while queue.snapshot().pending == 0 && !self.stopped() {
                tokio::time::sleep(PENDING_POLL).await;
            }
            if self.stopped() {
                break;
            }

            // Let more of the burst accumulate.
            tokio::time::sleep(DEBOUNCE).await;

            let drained = self.drain().await;
            if drained == 0 {
                continue;
            }
            debug!("drained {} items, waiting for upstream quiescence", drained);

            // Bounded quiescence wait; re-drain anything that lands while
            // upstream stages finish.
            let mut waits = 0;
            while self.pipeline.upstream_busy(Stage::Events)
                && !self.stopped()
                && waits < MAX_QUIESCENCE_WAITS
            {
                tokio::time::sleep(QUIESCENCE_POLL).await;
                waits += 1;
                let extra = self.drain().await;
                if extra > 0 {
                    debug!("drained {} more items while waiting", extra);
                }
            }
            if self.stopped() {
                break;
            }

            self.drain().await;

            info!("upstream settled, running batch operations");
            self.run_batch_ops().await;
        }

        info!("events coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::error::EnrichError;

    #[derive(Default)]
    struct CountingPass {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl CorpusPass for CountingPass {
        async fn run(&self) -> Result<usize, EnrichError> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_runs_after_drain_and_quiescence() {
        let pipeline = Arc::new(Pipeline::new());
        let clustering = Arc::new(CountingPass::default());
        let detection = Arc::new(CountingPass::default());
        let stop = Arc::new(AtomicBool::new(false));

        let coordinator = EventsCoordinator::new(
            Arc::clone(&pipeline),
            clustering.clone(),
            detection.clone(),
            Arc::clone(&stop),
        );

        pipeline.queue(Stage::Events).admit("k1").await;
        pipeline.queue(Stage::Events).admit("k2").await;

        let handle = tokio::spawn(coordinator.run());

        // Paused time auto-advances through the debounce and drain waits.
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(clustering.runs.load(Ordering::Relaxed) >= 1);
        assert!(detection.runs.load(Ordering::Relaxed) >= 1);
        assert_eq!(
            pipeline.queue(Stage::Events).snapshot().completed_total,
            2
        );
        assert!(pipeline.queue(Stage::Events).is_quiescent());

        stop.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn batch_waits_for_busy_upstream_but_is_bounded() {
        let pipeline = Arc::new(Pipeline::new());
        let clustering = Arc::new(CountingPass::default());
        let detection = Arc::new(CountingPass::default());
        let stop = Arc::new(AtomicBool::new(false));

        // A stuck upstream item: admitted and taken, never finished.
        pipeline.queue(Stage::Hashing).admit("stuck").await;
        pipeline
            .queue(Stage::Hashing)
            .take(Duration::from_millis(100))
            .await
            .unwrap();

        pipeline.queue(Stage::Events).admit("k").await;

        let coordinator = EventsCoordinator::new(
            Arc::clone(&pipeline),
            clustering.clone(),
            detection.clone(),
            Arc::clone(&stop),
        );
        let handle = tokio::spawn(coordinator.run());

        // Before the cap expires the batch must not have run.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(clustering.runs.load(Ordering::Relaxed), 0);

        // The 5-minute hard cap guarantees progress even with a wedged stage.
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(clustering.runs.load(Ordering::Relaxed) >= 1);
        assert!(detection.runs.load(Ordering::Relaxed) >= 1);

        stop.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.await.unwrap();
    }
}
