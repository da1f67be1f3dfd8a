//! Scheduler error types

use frame_meta::MetaError;
use infer_context::InferenceError;
use object_history::HistoryError;
use thiserror::Error;

use crate::downstream::FlowResult;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Inference context error: {0}")]
    Inference(#[from] InferenceError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Metadata error: {0}")]
    Meta(#[from] MetaError),

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Failed to spawn {name} thread: {reason}")]
    ThreadSpawn { name: String, reason: String },

    #[error("Downstream flow error: {0:?}")]
    Flow(FlowResult),
}
