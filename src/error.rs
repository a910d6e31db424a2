//! Error types for the scan engine.
//!
//! This module defines the primary error type, `ScanError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent taxonomy for everything that can go wrong during trajectory
//! generation and scan execution:
//!
//! - **`TrajectoryConfig`**: an invalid scan specification (inconsistent step
//!   sign, mismatched sequence lengths, too many points). Raised synchronously
//!   at generation time, before any hardware interaction.
//! - **`ActuatorTimeout` / `DetectorTimeout`**: a hardware module failed to
//!   report completion within the configured window. Fatal for the running
//!   scan; the coordinator returns to `Idle` and the error names the modules
//!   that failed.
//! - **`Hardware`**: a driver reported a failure for an issued command. Also
//!   fatal for the running scan.
//! - **`AveragingState`**: a detector changed its output shape between
//!   repeated grabs at the same step. Fatal, because folding mismatched
//!   shapes would silently corrupt the running mean.
//! - **`PersistenceAppend`**: the storage collaborator rejected an append.
//!   Non-fatal to acquisition but surfaced in the status stream.
//! - **`InvalidData`**: a `DataContainer` violating its construction
//!   invariants (axis/dimension mismatch, label count, spread constraints).
//! - **`Busy`**: `start()` was called while a scan is already running.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Error taxonomy for the scan engine.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan specification: {0}")]
    TrajectoryConfig(String),

    #[error("Actuator(s) {actuators:?} did not report move-done within {timeout:?}")]
    ActuatorTimeout {
        actuators: Vec<String>,
        timeout: Duration,
    },

    #[error("Detector(s) {detectors:?} did not report data-ready within {timeout:?}")]
    DetectorTimeout {
        detectors: Vec<String>,
        timeout: Duration,
    },

    #[error("Hardware fault from '{module}': {message}")]
    Hardware { module: String, message: String },

    #[error("Averaging state error: {0}")]
    AveragingState(String),

    #[error("Persistence append failed: {0}")]
    PersistenceAppend(String),

    #[error("Invalid data container: {0}")]
    InvalidData(String),

    #[error("A scan is already running")]
    Busy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scan task failed: {0}")]
    Internal(String),
}

impl ScanError {
    /// Whether this error aborts a running scan.
    ///
    /// Persistence failures are the one non-fatal kind: acquisition is not
    /// gated on storage success, but the operator is informed via the status
    /// stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScanError::PersistenceAppend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_errors_name_the_modules() {
        let err = ScanError::ActuatorTimeout {
            actuators: vec!["x_stage".into()],
            timeout: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("x_stage"));
        assert!(err.is_fatal());
    }

    #[test]
    fn persistence_errors_are_not_fatal() {
        let err = ScanError::PersistenceAppend("disk full".into());
        assert!(!err.is_fatal());
        assert!(ScanError::Busy.is_fatal());
    }
}
