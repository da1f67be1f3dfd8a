//! Application configuration

use std::path::Path;

use anyhow::Context;
use infer_context::MockConfig;
use infer_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix, e.g. `INFER__SCHEDULER__MAX_BATCH_SIZE=4`
pub const ENV_PREFIX: &str = "INFER";

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON records instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Metrics export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address of the Prometheus scrape endpoint, disabled when unset
    pub prometheus_addr: Option<String>,
}

/// Synthetic input stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub sources: u32,
    /// Frames per source
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub objects_per_source: u32,
    /// Delay between buffers (ms)
    pub frame_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sources: 2,
            frames: 120,
            width: 320,
            height: 240,
            objects_per_source: 3,
            frame_interval_ms: 33,
        }
    }
}

/// Top-level configuration of the demo binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub model: MockConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Sources, later ones overriding earlier ones:
    /// 1. built-in defaults
    /// 2. the optional TOML file
    /// 3. environment variables with the `INFER__` prefix
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infer_context::NetworkKind;
    use infer_scheduler::ProcessMode;

    #[test]
    fn test_load_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.scheduler.max_batch_size, 1);
        assert_eq!(config.stream.sources, 2);
        assert!(config.metrics.prometheus_addr.is_none());
    }

    #[test]
    fn test_load_toml_file() {
        let path = std::env::temp_dir().join(format!("infer-pipeline-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[scheduler]
max_batch_size = 4
async_mode = true
process_mode = "objects"

[scheduler.history]
reinfer_interval = 10

[scheduler.filter]
operate_on_class_ids = "0:2"

[model]
kind = "classifier"
width = 32
height = 32

[stream]
frames = 5
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.scheduler.max_batch_size, 4);
        assert!(config.scheduler.async_mode);
        assert_eq!(config.scheduler.process_mode, ProcessMode::Objects);
        assert_eq!(config.scheduler.history.reinfer_interval, 10);
        assert_eq!(config.scheduler.filter.operate_on_class_ids, vec![0, 2]);
        assert_eq!(config.model.kind, NetworkKind::Classifier);
        assert_eq!(config.model.width, 32);
        assert_eq!(config.stream.frames, 5);
        assert_eq!(config.stream.sources, 2);
    }

    #[test]
    fn test_load_rejects_invalid_scheduler() {
        let path = std::env::temp_dir().join(format!("infer-pipeline-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[scheduler]\nmax_batch_size = 0\n").unwrap();

        let result = AppConfig::load(Some(path.as_path()));
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
