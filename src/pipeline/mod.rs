//! The photo enrichment pipeline.
//!
//! A restart-safe, multi-stage, fan-out/fan-in scheduler. Producers admit
//! content keys into the first stage; per-stage workers drain their queue,
//! invoke the stage's enricher, and route finished keys to every successor
//! stage. The terminal EVENTS stage is handled by a batch coordinator that
//! waits for upstream quiescence before running whole-corpus passes.

mod batch;
mod ingest;
mod orchestrator;
mod queue;
mod scan_state;
mod stage;
mod worker;

pub use batch::EventsCoordinator;
pub use ingest::Ingest;
pub use orchestrator::{Pipeline, PipelineSnapshot, PipelineStatus};
pub use queue::{Admission, StageCounters, StageOutcome, StageQueue};
pub use scan_state::{ScanSnapshot, ScanState};
pub use stage::Stage;
pub use worker::{start_workers, CorpusPass, EnrichOutcome, Enricher, StageWorker, WorkerContext};
