//! Scan execution: averaging and the coordinator state machine.

pub mod accumulator;
pub mod coordinator;

pub use accumulator::{AveragingAccumulator, ChannelKey};
pub use coordinator::{ScanCoordinator, ScanRequest, ScanState, ScanStatus};
