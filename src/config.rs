//! Engine configuration loaded with Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with `NDSCAN_`)
//!
//! The engine never reaches for ambient global state: the loaded
//! [`EngineConfig`] is constructed by the process entry point and passed to
//! the coordinator explicitly.
//!
//! # Example
//! ```no_run
//! use ndscan::config::EngineConfig;
//!
//! let config = EngineConfig::load_from("config/ndscan.toml")?;
//! println!("move timeout: {:?}", config.timing.move_timeout);
//! # Ok::<(), figment::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeouts and pacing for the scan loop.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Trajectory limits.
    #[serde(default)]
    pub trajectory: TrajectoryConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            trajectory: TrajectoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Timeouts and pacing for the coordinator state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Per-move timeout: how long to wait for all move-done notifications.
    #[serde(with = "humantime_serde", default = "default_move_timeout")]
    pub move_timeout: Duration,
    /// Per-grab timeout: how long to wait for all data-ready notifications.
    #[serde(with = "humantime_serde", default = "default_grab_timeout")]
    pub grab_timeout: Duration,
    /// Optional settle time inserted between move-done and the grab commands.
    #[serde(default)]
    pub wait_between_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            move_timeout: default_move_timeout(),
            grab_timeout: default_grab_timeout(),
            wait_between_ms: 0,
        }
    }
}

/// Limits applied when a trajectory is materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Upper bound on the number of steps a materialized trajectory may have.
    #[serde(default = "default_steps_limit")]
    pub steps_limit: usize,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            steps_limit: default_steps_limit(),
        }
    }
}

/// Logging settings consumed by [`crate::logging::init_from_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "pretty", "compact" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_move_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_grab_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_steps_limit() -> usize {
    10_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl EngineConfig {
    /// Load configuration from a TOML file and `NDSCAN_` environment variables.
    ///
    /// Environment variables override file values, e.g.
    /// `NDSCAN_LOGGING_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NDSCAN_").split("_"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        if self.timing.move_timeout.is_zero() || self.timing.grab_timeout.is_zero() {
            return Err("Timeouts must be non-zero".to_string());
        }

        if self.trajectory.steps_limit == 0 {
            return Err("steps_limit must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.move_timeout, Duration::from_secs(10));
    }

    #[test]
    fn rejects_bad_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_fragment() {
        let toml = r#"
            [timing]
            move_timeout = "2s"
            grab_timeout = "500ms"
            wait_between_ms = 5

            [trajectory]
            steps_limit = 1000
        "#;
        let config: EngineConfig = figment::Figment::new()
            .merge(figment::providers::Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(config.timing.move_timeout, Duration::from_secs(2));
        assert_eq!(config.timing.grab_timeout, Duration::from_millis(500));
        assert_eq!(config.trajectory.steps_limit, 1000);
        // logging section absent falls back to defaults
        assert_eq!(config.logging.level, "info");
    }
}
