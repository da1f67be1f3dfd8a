//! Inference Pipeline Demo
//!
//! Wires the scheduler to the mock inference context, the host region
//! converter and a JSON-lines sink, and feeds it a synthetic stream.

mod settings;
mod sink;
mod stream;

pub use settings::{AppConfig, LoggingConfig, MetricsConfig, StreamConfig};
pub use sink::JsonLinesSink;
pub use stream::{StreamItem, SyntheticStream};

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("failed to set tracing subscriber")
}
