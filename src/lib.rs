//! N-dimensional scan coordination engine.
//!
//! `ndscan` coordinates scanning experiments: actuators step through an
//! N-dimensional trajectory while detectors acquire data at every point.
//! The crate provides the trajectory generators (grid, boustrophedon,
//! random, spiral, adaptive), the self-describing data containers the
//! results travel in, and an async coordinator that sequences moves, grabs,
//! software averaging and persistence with per-step join barriers.
//!
//! Hardware enters through the narrow traits in [`hardware::capabilities`];
//! mocks in [`hardware::mock`] back the tests and the simulated CLI run.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ndscan::config::EngineConfig;
//! use ndscan::engine::{ScanCoordinator, ScanRequest};
//! use ndscan::hardware::{Actuator, Detector, MemorySink, MockActuator, MockDetector};
//! use ndscan::scan::ScanSpec;
//!
//! # async fn run() -> ndscan::error::ScanResult<()> {
//! let stage = Arc::new(MockActuator::new("stage", Duration::from_millis(1)));
//! let detector = Arc::new(MockDetector::scalar(
//!     "photodiode",
//!     stage.position_handle(),
//!     |x| x * x,
//! ));
//! let coordinator = ScanCoordinator::new(
//!     EngineConfig::default(),
//!     vec![stage as Arc<dyn Actuator>],
//!     vec![detector as Arc<dyn Detector>],
//!     Arc::new(MemorySink::new()),
//! );
//! coordinator
//!     .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 4.0, 1.0)))
//!     .await?;
//! coordinator.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod scan;

pub use engine::{ScanCoordinator, ScanRequest, ScanState, ScanStatus};
pub use error::{ScanError, ScanResult};
