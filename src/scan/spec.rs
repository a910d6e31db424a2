//! Scan specifications.
//!
//! A [`ScanSpec`] is a plain configuration record built once from user or
//! config-file input before a scan starts, validated up front, and consumed
//! by the trajectory generator. Any UI layer binds to these structs from the
//! outside; they are the single source of truth.

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};

/// Top-level scan geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanType {
    /// One actuator axis.
    Scan1D,
    /// Two actuator axes.
    Scan2D,
    /// Arbitrary number of actuator axes, scanned as a nested grid.
    Sequential,
}

/// Trajectory ordering within the scanned space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanSubtype {
    /// Row-major grid, first actuator outermost.
    Linear,
    /// Boustrophedon: alternating rows reverse the innermost axis.
    BackAndForth,
    /// The Linear grid in shuffled order.
    Random,
    /// Square spiral growing outward from the start point (2D only).
    Spiral,
    /// Loss-driven sampling; not materialized up front.
    Adaptive,
}

/// Immutable description of a scan, one entry per actuator axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSpec {
    /// Scan geometry.
    pub scan_type: ScanType,
    /// Trajectory ordering.
    pub subtype: ScanSubtype,
    /// Start position per actuator axis (spiral: the center).
    pub starts: Vec<f64>,
    /// Stop position per actuator axis.
    pub stops: Vec<f64>,
    /// Signed step per actuator axis.
    pub steps: Vec<f64>,
    /// Spiral only: explicit per-axis maximum radius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmax: Option<Vec<f64>>,
    /// Spiral only: number of points per axis driving the radius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_per_axis: Option<usize>,
}

impl ScanSpec {
    /// One-actuator linear scan.
    pub fn linear_1d(start: f64, stop: f64, step: f64) -> Self {
        Self {
            scan_type: ScanType::Scan1D,
            subtype: ScanSubtype::Linear,
            starts: vec![start],
            stops: vec![stop],
            steps: vec![step],
            rmax: None,
            points_per_axis: None,
        }
    }

    /// Two-actuator grid scan.
    pub fn linear_2d(starts: [f64; 2], stops: [f64; 2], steps: [f64; 2]) -> Self {
        Self {
            scan_type: ScanType::Scan2D,
            subtype: ScanSubtype::Linear,
            starts: starts.to_vec(),
            stops: stops.to_vec(),
            steps: steps.to_vec(),
            rmax: None,
            points_per_axis: None,
        }
    }

    /// Square spiral around `centers` with `points_per_axis` driving the
    /// radius (`rmax = round(points_per_axis / 2) * step` per axis).
    pub fn spiral(centers: [f64; 2], steps: [f64; 2], points_per_axis: usize) -> Self {
        Self {
            scan_type: ScanType::Scan2D,
            subtype: ScanSubtype::Spiral,
            starts: centers.to_vec(),
            stops: centers.to_vec(),
            steps: steps.to_vec(),
            rmax: None,
            points_per_axis: Some(points_per_axis),
        }
    }

    /// Switch the trajectory ordering.
    pub fn with_subtype(mut self, subtype: ScanSubtype) -> Self {
        self.subtype = subtype;
        self
    }

    /// Number of actuator axes involved.
    pub fn n_axes(&self) -> usize {
        self.starts.len()
    }

    /// Validate sequence lengths and geometry before any hardware is touched.
    pub fn validate(&self) -> ScanResult<()> {
        if self.starts.len() != self.stops.len() || self.starts.len() != self.steps.len() {
            return Err(ScanError::TrajectoryConfig(format!(
                "starts/stops/steps have lengths {}/{}/{}",
                self.starts.len(),
                self.stops.len(),
                self.steps.len()
            )));
        }
        let expected = match self.scan_type {
            ScanType::Scan1D => Some(1),
            ScanType::Scan2D => Some(2),
            ScanType::Sequential => None,
        };
        if let Some(n) = expected {
            if self.n_axes() != n {
                return Err(ScanError::TrajectoryConfig(format!(
                    "{:?} requires {n} actuator axes, got {}",
                    self.scan_type,
                    self.n_axes()
                )));
            }
        }
        if self.subtype == ScanSubtype::Spiral {
            if self.scan_type != ScanType::Scan2D {
                return Err(ScanError::TrajectoryConfig(
                    "Spiral scans are two-dimensional".into(),
                ));
            }
            if self.points_per_axis.is_none() && self.rmax.is_none() {
                return Err(ScanError::TrajectoryConfig(
                    "Spiral scans need points_per_axis or rmax".into(),
                ));
            }
            if let Some(rmax) = &self.rmax {
                if rmax.len() != self.n_axes() {
                    return Err(ScanError::TrajectoryConfig(format!(
                        "rmax has {} entries for {} axes",
                        rmax.len(),
                        self.n_axes()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_lengths_rejected() {
        let spec = ScanSpec {
            scan_type: ScanType::Sequential,
            subtype: ScanSubtype::Linear,
            starts: vec![0.0, 0.0],
            stops: vec![1.0],
            steps: vec![0.1, 0.1],
            rmax: None,
            points_per_axis: None,
        };
        assert!(matches!(
            spec.validate(),
            Err(ScanError::TrajectoryConfig(_))
        ));
    }

    #[test]
    fn scan_type_fixes_axis_count() {
        let mut spec = ScanSpec::linear_1d(0.0, 1.0, 0.1);
        assert!(spec.validate().is_ok());
        spec.scan_type = ScanType::Scan2D;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn spiral_needs_radius_information() {
        let mut spec = ScanSpec::spiral([0.0, 0.0], [1.0, 1.0], 10);
        assert!(spec.validate().is_ok());
        spec.points_per_axis = None;
        assert!(spec.validate().is_err());
        spec.rmax = Some(vec![5.0, 5.0]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn toml_round_trip() {
        let spec = ScanSpec::linear_2d([0.0, -1.0], [1.0, 1.0], [0.1, 0.5])
            .with_subtype(ScanSubtype::BackAndForth);
        let text = toml::to_string(&spec).unwrap();
        let back: ScanSpec = toml::from_str(&text).unwrap();
        assert_eq!(spec, back);
    }
}
