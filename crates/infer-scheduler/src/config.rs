//! Scheduler configuration

use infer_context::NetworkKind;
use object_history::HistoryConfig;
use region_filter::RegionFilterConfig;
use serde::{Deserialize, Serialize};
use surface_transform::AspectPolicy;

use crate::error::SchedulerError;

/// Component id stamped on attached metadata when none is configured
pub const DEFAULT_UNIQUE_ID: u32 = 15;
/// Regions per batch when none is configured
pub const DEFAULT_BATCH_SIZE: usize = 1;
/// Conversion buffers kept in the pool
pub const DEFAULT_POOL_SIZE: usize = 3;

/// What regions of a buffer are inferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Every frame surface as a whole
    FullFrame,
    /// Objects attached to the frames by upstream components
    #[default]
    Objects,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Component id stamped on every attached result
    pub unique_id: u32,
    /// Maximum regions per inference batch
    pub max_batch_size: usize,
    /// Forward buffers before inference completes and attach results lazily
    pub async_mode: bool,
    pub process_mode: ProcessMode,
    pub network_kind: NetworkKind,
    /// Buffers skipped after each inferred buffer in full-frame mode
    pub interval: u32,
    /// Number of pooled conversion buffers
    pub pool_size: usize,
    pub aspect_policy: AspectPolicy,
    pub history: HistoryConfig,
    pub filter: RegionFilterConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            unique_id: DEFAULT_UNIQUE_ID,
            max_batch_size: DEFAULT_BATCH_SIZE,
            async_mode: false,
            process_mode: ProcessMode::Objects,
            network_kind: NetworkKind::Classifier,
            interval: 0,
            pool_size: DEFAULT_POOL_SIZE,
            aspect_policy: AspectPolicy::Stretch,
            history: HistoryConfig::default(),
            filter: RegionFilterConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Secondary classifier on tracked objects
    pub fn classifier(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            ..Default::default()
        }
    }

    /// Primary detector on whole frames
    pub fn detector(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            process_mode: ProcessMode::FullFrame,
            network_kind: NetworkKind::Detector,
            ..Default::default()
        }
    }

    /// Check values that would make the scheduler unusable
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_batch_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.history.cleanup_interval == 0 {
            return Err(SchedulerError::InvalidConfig(
                "history.cleanup_interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Asynchronous dispatch only applies to classifiers on objects
    pub fn supports_async(&self) -> bool {
        self.process_mode == ProcessMode::Objects && self.network_kind == NetworkKind::Classifier
    }
}
