//! Enrichment services.
//!
//! Each per-item service implements the `Enricher` contract; whole-corpus
//! operations (face clustering, event detection, duplicate grouping)
//! implement `CorpusPass`. Services own their side effects and persist
//! their own completion flags so every stage stays idempotent.

pub mod captioner;
pub mod events;
pub mod exif;
pub mod faces;
pub mod geocoder;
pub mod hasher;
pub mod motion;
pub mod scanner;
pub mod thumbnail;

pub use captioner::CaptioningEnricher;
pub use events::EventDetectionPass;
pub use exif::ExifEnricher;
pub use faces::{DisabledFaceEngine, FaceClusteringPass, FaceEngine, FaceEnricher};
pub use geocoder::GeocodingEnricher;
pub use hasher::{DuplicateGroupingPass, HashingEnricher};
pub use motion::MotionEnricher;
pub use scanner::{ScanEvent, ScanStats, Scanner};
pub use thumbnail::ThumbnailEnricher;
