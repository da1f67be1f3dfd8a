//! Downstream consumer and output hook interfaces

use frame_meta::Buffer;
use infer_context::BatchOutput;
use serde::{Deserialize, Serialize};

/// Result of pushing a buffer downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowResult {
    #[default]
    Ok,
    /// Downstream is flushing and dropped the buffer
    Flushing,
    /// Downstream reached end of stream
    Eos,
    NotLinked,
    NotNegotiated,
    Error,
}

impl FlowResult {
    /// Flow results that must stop the upstream producer
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowResult::NotLinked | FlowResult::NotNegotiated | FlowResult::Error
        )
    }
}

/// Consumer of forwarded buffers
pub trait Downstream: Send + Sync {
    fn push(&self, buffer: Buffer) -> FlowResult;
}

/// Callback receiving the raw outputs of every inferred batch before release
pub trait OutputHook: Send + Sync {
    fn on_output(&self, buffer: Option<&Buffer>, output: &BatchOutput);
}
