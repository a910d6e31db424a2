//! Hardware capability traits and the mock implementations used by tests
//! and the simulated CLI run.

pub mod capabilities;
pub mod mock;

pub use capabilities::{Actuator, Detector, PersistenceSink};
pub use mock::{MemorySink, MockActuator, MockDetector};
