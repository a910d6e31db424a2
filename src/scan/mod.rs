//! Scan specification, trajectory generation, and adaptive sampling.

pub mod adaptive;
pub mod spec;
pub mod trajectory;

pub use adaptive::{AdaptiveScan, AdaptiveStop};
pub use spec::{ScanSpec, ScanSubtype, ScanType};
pub use trajectory::{generate, ScanPositions};
