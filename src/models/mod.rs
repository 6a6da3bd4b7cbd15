//! Data models for photarc.

mod event;
mod face;
mod photo;

pub use event::{Event, EventCluster};
pub use face::{DetectedFace, Face, Person};
pub use photo::{Caption, DuplicateGroup, PerceptualHashes, Photo};
