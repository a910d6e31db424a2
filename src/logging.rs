//! Tracing infrastructure.
//!
//! Structured, async-aware logging built on `tracing` and
//! `tracing-subscriber`:
//! - structured events with spans
//! - multiple output formats (pretty, compact, JSON)
//! - environment-based filtering via `RUST_LOG`
//! - integration with the engine configuration
//!
//! # Example
//! ```no_run
//! use ndscan::{config::EngineConfig, logging};
//!
//! let config = EngineConfig::default();
//! logging::init_from_config(&config.logging)?;
//! tracing::info!("engine ready");
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::config::LoggingConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development).
    Pretty,
    /// Compact format without colors (for production).
    Compact,
    /// JSON format for log aggregation.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(anyhow!("Unknown log format: {other}")),
        }
    }
}

/// Initialize the global tracing subscriber from the logging configuration.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
/// Returns an error if a global subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let format: OutputFormat = config.format.parse()?;

    let fmt_layer = match format {
        OutputFormat::Pretty => fmt::layer().with_target(true).with_ansi(true).boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    Ok(())
}
