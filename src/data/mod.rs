//! Data model: axes and N-dimensional containers.

pub mod axis;
pub mod container;

pub use axis::{linear_sequence, Axis, AxisRepresentation};
pub use container::{DataContainer, DataDim, DataSource, Distribution};
