//! History configuration

use serde::{Deserialize, Serialize};

/// Reinference and eviction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Frames after which a cached object is inferred again (default: never)
    pub reinfer_interval: u64,
    /// Relative area growth that triggers reinference (default: 0.2)
    pub reinfer_area_threshold: f32,
    /// Frames an entry may go unseen before it is evictable (default: 150)
    pub staleness_threshold: u64,
    /// Frames between eviction sweeps of a source (default: 1800)
    pub cleanup_interval: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            reinfer_interval: u64::MAX,
            reinfer_area_threshold: 0.2,
            staleness_threshold: 150,
            cleanup_interval: 1800,
        }
    }
}

impl HistoryConfig {
    /// Reinfer every `frames` frames
    pub fn with_reinfer_interval(mut self, frames: u64) -> Self {
        self.reinfer_interval = frames;
        self
    }
}
