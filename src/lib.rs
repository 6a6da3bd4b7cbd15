//! photarc - local photo indexing and enrichment.
//!
//! Walks a directory tree of photographs, records each file under a
//! content key, and drives every photo through a restart-safe enrichment
//! pipeline: EXIF extraction, reverse geocoding, thumbnails, motion-video
//! extraction, perceptual hashing, face detection, captioning, and
//! time-plus-location event clustering. Results land in a SQLite store
//! and are served over a JSON/websocket API.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod server;
pub mod services;
pub mod watcher;
