//! Per-stage workers: drain one queue, invoke the stage's enricher, apply
//! the required/optional policy, and route to successor stages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::orchestrator::Pipeline;
use super::queue::StageOutcome;
use super::stage::Stage;
use crate::error::EnrichError;
use crate::models::Photo;
use crate::repository::PhotoRepository;

const TAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// What an enricher did for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Side effects were performed and persisted.
    Done,
    /// Nothing to do for this item (already done, not applicable, or the
    /// backing model/backend is absent).
    NoOp,
}

/// A per-item enrichment capability: given an item key, perform side
/// effects and report the outcome.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError>;
}

/// A whole-corpus batch operation (face clustering, event detection).
#[async_trait]
pub trait CorpusPass: Send + Sync {
    /// Run over the full corpus; returns the number of aggregates touched.
    async fn run(&self) -> Result<usize, EnrichError>;
}

/// Shared lookup table handed to every worker.
pub struct WorkerContext {
    photos: PhotoRepository,
    enrichers: HashMap<Stage, Arc<dyn Enricher>>,
}

impl WorkerContext {
    pub fn new(photos: PhotoRepository) -> Self {
        Self {
            photos,
            enrichers: HashMap::new(),
        }
    }

    pub fn register(mut self, stage: Stage, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.insert(stage, enricher);
        self
    }

    fn enricher(&self, stage: Stage) -> Option<Arc<dyn Enricher>> {
        self.enrichers.get(&stage).cloned()
    }
}

/// The persistent completion flag for a stage, if it has one. Stages
/// without a flag (DISCOVERY, MOTION) always run their enricher, which is
/// itself idempotent.
fn stage_flag(stage: Stage, photo: &Photo) -> Option<bool> {
    match stage {
        Stage::Exif => Some(photo.exif_extracted),
        Stage::Geocoding => Some(photo.location_country.is_some()),
        Stage::Thumbnails => Some(photo.thumbnail_generated),
        Stage::Hashing => Some(photo.perceptual_hashed),
        Stage::Faces => Some(photo.faces_detected),
        Stage::Captioning => Some(photo.ollama_captioned),
        Stage::Discovery | Stage::Motion | Stage::Events => None,
    }
}

/// One worker pinned to one stage.
pub struct StageWorker {
    pipeline: Arc<Pipeline>,
    ctx: Arc<WorkerContext>,
    stage: Stage,
    worker_id: usize,
    stop: Arc<AtomicBool>,
}

impl StageWorker {
    pub fn new(
        pipeline: Arc<Pipeline>,
        ctx: Arc<WorkerContext>,
        stage: Stage,
        worker_id: usize,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            ctx,
            stage,
            worker_id,
            stop,
        }
    }

    /// Worker loop. The take timeout lets a graceful shutdown observe the
    /// stop flag without an in-flight item.
    pub async fn run(self) {
        info!(stage = %self.stage, worker = self.worker_id, "worker started");
        let queue = self.pipeline.queue(self.stage);

        while !self.stop.load(Ordering::Relaxed) {
            let Some(key) = queue.take(TAKE_TIMEOUT).await else {
                continue;
            };
            self.process(&key).await;
        }

        info!(stage = %self.stage, worker = self.worker_id, "worker stopped");
    }

    /// Drive a single key through this stage.
    pub async fn process(&self, key: &str) {
        let queue = self.pipeline.queue(self.stage);

        // Discovery is producer-supplied; the item is already persisted.
        if self.stage == Stage::Discovery {
            queue.mark_active(key, None);
            queue.finish(key, StageOutcome::Completed);
            self.pipeline.route_next(key, self.stage).await;
            return;
        }

        // Missing record is always Failed-no-route: nothing downstream can
        // work without the store row.
        let photo = match self.ctx.photos.get(key).await {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                warn!(stage = %self.stage, key, "no store record for key");
                queue.finish(key, StageOutcome::Failed);
                return;
            }
            Err(e) => {
                warn!(stage = %self.stage, key, error = %e, "store lookup failed");
                queue.finish(key, StageOutcome::Failed);
                return;
            }
        };

        queue.mark_active(key, Some(&photo.file_path));

        // Fast path: the persistent flag makes a restarted stage complete
        // in O(store-lookup) without re-running enrichment.
        if stage_flag(self.stage, &photo) == Some(true) {
            queue.finish(key, StageOutcome::Completed);
            self.pipeline.route_next(key, self.stage).await;
            return;
        }

        let outcome = match self.ctx.enricher(self.stage) {
            Some(enricher) => enricher.enrich(key).await,
            None => Ok(EnrichOutcome::NoOp),
        };

        match outcome {
            Ok(EnrichOutcome::Done) => {
                queue.finish(key, StageOutcome::Completed);
                self.pipeline.route_next(key, self.stage).await;
            }
            Ok(EnrichOutcome::NoOp) => {
                debug!(stage = %self.stage, key, "nothing to do");
                queue.finish(key, StageOutcome::Completed);
                self.pipeline.route_next(key, self.stage).await;
            }
            Err(e) if self.stage.is_required() => {
                warn!(stage = %self.stage, key, error = %e, "required stage failed; item is stuck until rescan");
                queue.finish(key, StageOutcome::Failed);
            }
            Err(e) => {
                warn!(stage = %self.stage, key, error = %e, "optional stage failed; advancing");
                queue.finish(key, StageOutcome::Completed);
                self.pipeline.route_next(key, self.stage).await;
            }
        }
    }
}

/// Spawn `workers_per_stage` workers for every per-item stage. EVENTS is
/// excluded; it belongs to the batch coordinator.
pub fn start_workers(
    pipeline: Arc<Pipeline>,
    ctx: Arc<WorkerContext>,
    workers_per_stage: usize,
    stop: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for stage in Stage::ALL {
        if stage == Stage::Events {
            continue;
        }
        for i in 0..workers_per_stage {
            let worker = StageWorker::new(
                Arc::clone(&pipeline),
                Arc::clone(&ctx),
                stage,
                handles.len() + i,
                Arc::clone(&stop),
            );
            handles.push(tokio::spawn(worker.run()));
        }
    }
    pipeline.mark_started();
    info!("started {} pipeline workers", handles.len());
    handles
}
