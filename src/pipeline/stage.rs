//! The closed set of enrichment stages.

use serde::Serialize;

/// One enrichment step. Stages are per-item except EVENTS, which is a
/// terminal batch stage owned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Exif,
    Geocoding,
    Thumbnails,
    Motion,
    Hashing,
    Faces,
    Captioning,
    Events,
}

impl Stage {
    /// Every stage, in default topology order.
    pub const ALL: [Stage; 9] = [
        Stage::Discovery,
        Stage::Exif,
        Stage::Geocoding,
        Stage::Thumbnails,
        Stage::Motion,
        Stage::Hashing,
        Stage::Faces,
        Stage::Captioning,
        Stage::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Exif => "exif",
            Stage::Geocoding => "geocoding",
            Stage::Thumbnails => "thumbnails",
            Stage::Motion => "motion",
            Stage::Hashing => "hashing",
            Stage::Faces => "faces",
            Stage::Captioning => "captioning",
            Stage::Events => "events",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Stage::ALL.iter().copied().find(|stage| stage.as_str() == s)
    }

    /// Whether a failure at this stage must prevent routing. Optional
    /// stages advance even when their enricher is absent or broken.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Stage::Discovery | Stage::Exif | Stage::Thumbnails | Stage::Hashing
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("unknown"), None);
    }

    #[test]
    fn policy_matrix() {
        assert!(Stage::Exif.is_required());
        assert!(Stage::Thumbnails.is_required());
        assert!(Stage::Hashing.is_required());
        assert!(!Stage::Geocoding.is_required());
        assert!(!Stage::Motion.is_required());
        assert!(!Stage::Faces.is_required());
        assert!(!Stage::Captioning.is_required());
    }
}
