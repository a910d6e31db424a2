//! Coordinate axes for N-dimensional data.
//!
//! An [`Axis`] describes one array dimension of a data container: its label,
//! physical units, which dimension it indexes, and the coordinate values
//! themselves. Coordinates are stored either as a uniform descriptor
//! (`offset + i * scaling`, materialized lazily) or as an explicit array of
//! possibly unsorted values.
//!
//! Axes that jointly index a non-gridded ("spread") navigation space carry a
//! `spread_order` so composite-key lookups have a stable ordering.

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Relative tolerance used for coordinate comparison.
const REL_TOL: f64 = 1e-9;
/// Absolute floor so values near zero still compare equal.
const ABS_TOL: f64 = 1e-12;

pub(crate) fn float_eq(a: f64, b: f64) -> bool {
    let diff = (a - b).abs();
    diff <= ABS_TOL || diff <= REL_TOL * a.abs().max(b.abs())
}

/// Coordinate storage for an [`Axis`]. Exactly one representation exists by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AxisRepresentation {
    /// Regular grid: `coordinate[i] = offset + i * scaling`.
    Uniform {
        offset: f64,
        scaling: f64,
        size: usize,
    },
    /// Arbitrary, possibly unsorted coordinates.
    Explicit(Vec<f64>),
}

/// One coordinate axis of an N-dimensional data container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    /// Human-readable label (typically the actuator or signal name).
    pub label: String,
    /// Physical units (SI notation recommended).
    pub units: String,
    /// Which array dimension this axis describes.
    pub index: usize,
    /// Ordering key for axes jointly indexing a spread navigation space.
    pub spread_order: Option<usize>,
    representation: AxisRepresentation,
}

impl Axis {
    /// Create a uniform axis `offset + i * scaling` of the given size.
    pub fn uniform(
        label: impl Into<String>,
        units: impl Into<String>,
        index: usize,
        offset: f64,
        scaling: f64,
        size: usize,
    ) -> Self {
        Self {
            label: label.into(),
            units: units.into(),
            index,
            spread_order: None,
            representation: AxisRepresentation::Uniform {
                offset,
                scaling,
                size,
            },
        }
    }

    /// Create an axis from explicit coordinate values.
    pub fn explicit(
        label: impl Into<String>,
        units: impl Into<String>,
        index: usize,
        data: Vec<f64>,
    ) -> Self {
        Self {
            label: label.into(),
            units: units.into(),
            index,
            spread_order: None,
            representation: AxisRepresentation::Explicit(data),
        }
    }

    /// Mark this axis as part of a spread navigation set.
    pub fn with_spread_order(mut self, order: usize) -> Self {
        self.spread_order = Some(order);
        self
    }

    /// Build a uniform axis covering `start..=stop` with signed `step`.
    ///
    /// A single-point axis is returned when `start == stop`, regardless of
    /// the step sign. Otherwise a zero step, or a step whose sign disagrees
    /// with `stop - start`, is a configuration error.
    pub fn linear_steps(
        label: impl Into<String>,
        units: impl Into<String>,
        index: usize,
        start: f64,
        stop: f64,
        step: f64,
    ) -> ScanResult<Self> {
        let coords = linear_sequence(start, stop, step)?;
        Ok(Self::uniform(label, units, index, start, step, coords.len()))
    }

    /// Coordinate values. Uniform axes are materialized lazily; explicit axes
    /// are borrowed.
    pub fn data(&self) -> Cow<'_, [f64]> {
        match &self.representation {
            AxisRepresentation::Uniform {
                offset,
                scaling,
                size,
            } => Cow::Owned(
                (0..*size)
                    .map(|i| offset + scaling * i as f64)
                    .collect::<Vec<_>>(),
            ),
            AxisRepresentation::Explicit(data) => Cow::Borrowed(data.as_slice()),
        }
    }

    /// Number of coordinate points.
    pub fn len(&self) -> usize {
        match &self.representation {
            AxisRepresentation::Uniform { size, .. } => *size,
            AxisRepresentation::Explicit(data) => data.len(),
        }
    }

    /// Whether the axis has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access the underlying representation.
    pub fn representation(&self) -> &AxisRepresentation {
        &self.representation
    }

    /// Reindex the axis to describe a different array dimension.
    pub(crate) fn at_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

impl PartialEq for Axis {
    fn eq(&self, other: &Self) -> bool {
        if self.label != other.label
            || self.units != other.units
            || self.index != other.index
            || self.spread_order != other.spread_order
        {
            return false;
        }
        match (&self.representation, &other.representation) {
            (
                AxisRepresentation::Uniform {
                    offset: o1,
                    scaling: s1,
                    size: n1,
                },
                AxisRepresentation::Uniform {
                    offset: o2,
                    scaling: s2,
                    size: n2,
                },
            ) => n1 == n2 && float_eq(*o1, *o2) && float_eq(*s1, *s2),
            // Mixed representations compare by materialized values.
            _ => {
                let a = self.data();
                let b = other.data();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| float_eq(*x, *y))
            }
        }
    }
}

/// Inclusive arange from `start` to `stop` with signed `step`.
///
/// Semantics match the scan tradition: the number of points is
/// `ceil((stop - start) / step)`, extended by one when `stop` lands on the
/// grid within 1e-12. `start == stop` collapses to a single point.
pub fn linear_sequence(start: f64, stop: f64, step: f64) -> ScanResult<Vec<f64>> {
    if start == stop {
        return Ok(vec![start]);
    }
    if step.abs() < 1e-12 {
        return Err(ScanError::TrajectoryConfig(format!(
            "Zero step for a scan from {start} to {stop}"
        )));
    }
    if (stop - start).signum() != step.signum() {
        return Err(ScanError::TrajectoryConfig(format!(
            "Step sign {step} disagrees with scan direction {start} -> {stop}"
        )));
    }
    let mut n = ((stop - start) / step).ceil() as usize;
    if n == 0 {
        n = 1;
    }
    let reached = start + (n - 1) as f64 * step;
    if (reached + step - stop).abs() < 1e-12 {
        n += 1;
    }
    Ok((0..n).map(|i| start + i as f64 * step).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_sequence_inclusive() {
        let seq = linear_sequence(0.0, 10.0, 1.0).unwrap();
        assert_eq!(seq.len(), 11);
        assert_eq!(seq[0], 0.0);
        assert_eq!(seq[10], 10.0);
    }

    #[test]
    fn linear_sequence_descending() {
        let seq = linear_sequence(5.0, 1.0, -2.0).unwrap();
        assert_eq!(seq, vec![5.0, 3.0, 1.0]);
    }

    #[test]
    fn linear_sequence_partial_step() {
        // stop not on the grid: last point stays below stop
        let seq = linear_sequence(0.0, 0.5, 1.0).unwrap();
        assert_eq!(seq, vec![0.0]);
    }

    #[test]
    fn single_point_axis_ignores_step_sign() {
        // start == stop must not raise, whatever the step says
        for step in [-1.0, 0.0, 1.0] {
            let axis = Axis::linear_steps("x", "mm", 0, 2.5, 2.5, step).unwrap();
            assert_eq!(axis.len(), 1);
            assert_eq!(axis.data()[0], 2.5);
        }
    }

    #[test]
    fn zero_or_wrong_sign_step_is_rejected() {
        assert!(matches!(
            linear_sequence(0.0, 1.0, 0.0),
            Err(ScanError::TrajectoryConfig(_))
        ));
        assert!(matches!(
            linear_sequence(0.0, 1.0, -0.1),
            Err(ScanError::TrajectoryConfig(_))
        ));
        assert!(matches!(
            linear_sequence(1.0, 0.0, 0.1),
            Err(ScanError::TrajectoryConfig(_))
        ));
    }

    #[test]
    fn uniform_axis_materializes_lazily() {
        let axis = Axis::uniform("x", "mm", 0, 1.0, 0.5, 4);
        assert_eq!(axis.data().as_ref(), &[1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn equality_uses_float_tolerance() {
        let a = Axis::uniform("x", "mm", 0, 0.1, 0.2, 5);
        let b = Axis::uniform("x", "mm", 0, 0.1 + 1e-13, 0.2, 5);
        assert_eq!(a, b);

        let c = Axis::uniform("x", "mm", 0, 0.1 + 1e-3, 0.2, 5);
        assert_ne!(a, c);
    }

    #[test]
    fn uniform_and_explicit_compare_by_values() {
        let a = Axis::uniform("x", "mm", 0, 0.0, 1.0, 3);
        let b = Axis::explicit("x", "mm", 0, vec![0.0, 1.0, 2.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn serde_round_trip() {
        let axis = Axis::explicit("y", "um", 1, vec![3.0, 1.0, 2.0]).with_spread_order(1);
        let json = serde_json::to_string(&axis).unwrap();
        let back: Axis = serde_json::from_str(&json).unwrap();
        assert_eq!(axis, back);
    }
}
