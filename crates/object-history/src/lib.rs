//! Tracked Object History
//!
//! Caches the last inference result of every tracked object, per source, and
//! decides whether an object needs to be inferred again or can reuse its
//! cached result. Entries are swept periodically once unseen for long enough.

mod config;
mod entry;
mod store;

pub use config::HistoryConfig;
pub use entry::{merge_classification, ObjectHistory};
pub use store::{HistoryHandle, HistoryStore, SourceInfo};

use thiserror::Error;

/// History error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Unknown source {0}")]
    UnknownSource(u32),
}
