//! Batched Inference Scheduler
//!
//! Decides which regions of incoming buffers need inference, groups them into
//! bounded batches, runs submission and retrieval on dedicated threads and
//! forwards every buffer downstream in submission order.
//!
//! ```text
//! submit ─► BatchAssembler ─► input queue ─► [input thread] ─► process queue ─► [output thread] ─► Downstream
//!                │                              queue_input_batch                 dequeue_output_batch
//!                └── HistoryStore ◄──────────────────────────────────────────────── merge / attach
//! ```

mod assembler;
mod batch;
mod config;
mod downstream;
mod error;
mod gate;
mod pipeline;
mod pool;
mod stats;

pub use batch::{Batch, BatchKind, DeferredMeta, Frame, InferBatch};
pub use config::{ProcessMode, SchedulerConfig};
pub use downstream::{Downstream, FlowResult, OutputHook};
pub use error::SchedulerError;
pub use gate::OrderingGate;
pub use pipeline::{InferPipeline, SinkEvent};
pub use pool::{ConversionPool, PooledBuffer};
pub use stats::{PipelineStats, StatsSnapshot};
