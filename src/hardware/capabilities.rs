//! Narrow capability traits for the hardware the engine coordinates.
//!
//! The engine never talks to concrete devices; it holds trait objects and
//! lets each implementation manage its own connection and interior state.
//! Implementations take `&self` and use interior mutability so they can be
//! shared across spawned tasks behind an `Arc`.

use crate::data::DataContainer;
use anyhow::Result;
use async_trait::async_trait;

/// A positionable device (motor stage, delay line, voltage source).
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Stable identifier used in logs and error reports.
    fn id(&self) -> &str;

    /// Move to an absolute position; resolves once the move has settled.
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Current position readback.
    async fn get_value(&self) -> Result<f64>;
}

/// A device producing one N-dimensional acquisition per grab.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable identifier used in logs and error reports.
    fn id(&self) -> &str;

    /// Acquire one exposure and return its signal-only container.
    ///
    /// `n_average` is a hint for devices that average internally; the engine
    /// treats the returned data as a single sample either way and does its
    /// own averaging.
    async fn grab(&self, n_average: usize) -> Result<DataContainer>;
}

/// Append-only storage for completed scan steps.
///
/// Retrying a `nav_index` must overwrite the earlier write (last write
/// wins). Failures here are surfaced but do not abort the scan.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn append(&self, container: &DataContainer, nav_index: &[usize]) -> Result<()>;
}
