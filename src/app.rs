//! Runtime assembly: wires the store, the pipeline, the enrichers, and
//! the producers together for the CLI entry points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::pipeline::{
    EventsCoordinator, Ingest, Pipeline, ScanState, Stage, WorkerContext,
};
use crate::repository::{migrations, Store};
use crate::server::AppState;
use crate::services::{
    CaptioningEnricher, DisabledFaceEngine, EventDetectionPass, ExifEnricher, FaceClusteringPass,
    FaceEnricher, GeocodingEnricher, HashingEnricher, MotionEnricher, ThumbnailEnricher,
};

/// A fully wired application instance.
pub struct App {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub pipeline: Arc<Pipeline>,
    pub ingest: Arc<Ingest>,
    stop: Arc<AtomicBool>,
}

impl App {
    /// Ensure directories exist, run migrations, and build the core.
    pub async fn bootstrap(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        settings.ensure_directories()?;
        migrations::run_migrations(&settings.database_url()).await?;

        let store = Store::from_url(&settings.database_url());
        let pipeline = Arc::new(Pipeline::new());
        let scan_state = Arc::new(ScanState::new());
        let ingest = Arc::new(Ingest::new(
            Arc::clone(&settings),
            Arc::clone(&pipeline),
            scan_state,
            store.clone(),
        ));

        Ok(Self {
            settings,
            store,
            pipeline,
            ingest,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Signal every worker to stop after its current item.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.pipeline.mark_stopped();
    }

    /// Build the per-stage enricher table.
    pub fn worker_context(&self) -> WorkerContext {
        let settings = &self.settings;
        let store = &self.store;
        WorkerContext::new(store.photos())
            .register(
                Stage::Exif,
                Arc::new(ExifEnricher::new(Arc::clone(settings), store.photos())),
            )
            .register(
                Stage::Geocoding,
                Arc::new(GeocodingEnricher::new(store.photos())),
            )
            .register(
                Stage::Thumbnails,
                Arc::new(ThumbnailEnricher::new(Arc::clone(settings), store.photos())),
            )
            .register(
                Stage::Motion,
                Arc::new(MotionEnricher::new(Arc::clone(settings), store.photos())),
            )
            .register(
                Stage::Hashing,
                Arc::new(HashingEnricher::new(
                    Arc::clone(settings),
                    store.photos(),
                    store.duplicates(),
                )),
            )
            .register(
                Stage::Faces,
                Arc::new(FaceEnricher::new(
                    Arc::clone(settings),
                    store.photos(),
                    store.faces(),
                    Arc::new(DisabledFaceEngine),
                )),
            )
            .register(
                Stage::Captioning,
                Arc::new(CaptioningEnricher::new(
                    Arc::clone(settings),
                    store.photos(),
                    store.captions(),
                )),
            )
    }

    /// Spawn per-stage workers.
    pub fn start_workers(&self) -> Vec<JoinHandle<()>> {
        let ctx = Arc::new(self.worker_context());
        crate::pipeline::start_workers(
            Arc::clone(&self.pipeline),
            ctx,
            self.settings.workers_per_stage,
            self.stop_flag(),
        )
    }

    /// Spawn the EVENTS batch coordinator.
    pub fn start_events_coordinator(&self) -> JoinHandle<()> {
        let coordinator = EventsCoordinator::new(
            Arc::clone(&self.pipeline),
            Arc::new(FaceClusteringPass::new(self.store.faces())),
            Arc::new(EventDetectionPass::new(
                self.store.photos(),
                self.store.events(),
            )),
            self.stop_flag(),
        );
        tokio::spawn(coordinator.run())
    }

    /// Shared state for the HTTP layer.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.ingest),
            &self.store,
        )
    }
}
