//! Logging initialization.
//!
//! Sets up a `tracing-subscriber` registry with:
//! - level from `RUST_LOG`, falling back to [`LogConfig::level`]
//! - human-readable or JSON lines on stderr
//!
//! Calling [`init`] more than once is harmless; the first subscriber wins.

use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `order_pipeline=debug`.
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// # Example
///
/// ```ignore
/// order_pipeline::logging::init(&LogConfig::default());
/// tracing::info!("pipeline starting");
/// ```
pub fn init(config: &LogConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(config.with_target)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(config.with_target)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(config.with_target)
            .with_writer(io::stderr)
            .boxed(),
    };

    // Already initialized elsewhere (tests, an embedding binary): keep theirs.
    let _ = tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init();
}
