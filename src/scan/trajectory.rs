//! Trajectory generation.
//!
//! [`generate`] turns a validated [`ScanSpec`] into [`ScanPositions`]: the
//! ordered list of actuator targets plus the cached per-axis unique
//! coordinates and per-step indexes into them. The cache is computed exactly
//! once; the coordinator and storage look navigation indexes up per step
//! without recomputing anything.
//!
//! Grid conventions: the first actuator axis is the outermost loop (C order).
//! Back-and-forth reverses the innermost sequence on every other outer row to
//! minimize travel. Random visits the exact Linear grid in shuffled order.
//! Spiral walks a square spiral outward from the start point. Adaptive scans
//! are inherently lazy and are handled by [`crate::scan::adaptive`], not
//! here.

use crate::data::axis::{linear_sequence, Axis};
use crate::error::{ScanError, ScanResult};
use crate::scan::spec::{ScanSpec, ScanSubtype};
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// A materialized trajectory: `positions[step][axis]` plus cached lookup
/// tables, read-only for the whole scan once generated.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPositions {
    positions: Vec<Vec<f64>>,
    axes_unique: Vec<Vec<f64>>,
    axes_indexes: Vec<Vec<usize>>,
}

impl ScanPositions {
    /// Build the lookup tables from raw positions.
    ///
    /// `axes_unique` keeps, per axis, the unique coordinates in order of
    /// first appearance; `axes_indexes` maps every step to its index in each
    /// axis's unique list.
    pub fn from_positions(positions: Vec<Vec<f64>>) -> Self {
        let n_axes = positions.first().map_or(0, Vec::len);
        let mut axes_unique: Vec<Vec<f64>> = vec![Vec::new(); n_axes];
        let mut seen: Vec<HashMap<u64, usize>> = vec![HashMap::new(); n_axes];
        let mut axes_indexes = Vec::with_capacity(positions.len());

        for step in &positions {
            let mut indexes = Vec::with_capacity(n_axes);
            for (axis, &value) in step.iter().enumerate() {
                let key = value.to_bits();
                let idx = *seen[axis].entry(key).or_insert_with(|| {
                    axes_unique[axis].push(value);
                    axes_unique[axis].len() - 1
                });
                indexes.push(idx);
            }
            axes_indexes.push(indexes);
        }

        Self {
            positions,
            axes_unique,
            axes_indexes,
        }
    }

    /// Number of steps in the trajectory.
    pub fn n_steps(&self) -> usize {
        self.positions.len()
    }

    /// Number of actuator axes.
    pub fn n_axes(&self) -> usize {
        self.axes_unique.len()
    }

    /// All target positions, step-major.
    pub fn positions(&self) -> &[Vec<f64>] {
        &self.positions
    }

    /// Target position for one step.
    pub fn position_at(&self, step: usize) -> &[f64] {
        &self.positions[step]
    }

    /// Unique coordinates per axis, in order of first appearance.
    pub fn axes_unique(&self) -> &[Vec<f64>] {
        &self.axes_unique
    }

    /// Per-axis index into `axes_unique` for one step.
    pub fn nav_index_at(&self, step: usize) -> &[usize] {
        &self.axes_indexes[step]
    }

    /// Shape of the navigation space: unique count per axis.
    pub fn scan_shape(&self) -> Vec<usize> {
        self.axes_unique.iter().map(Vec::len).collect()
    }

    /// Navigation axis for one actuator, from the cached unique coordinates.
    pub fn nav_axis(&self, axis: usize, label: impl Into<String>, units: impl Into<String>) -> Axis {
        Axis::explicit(label, units, axis, self.axes_unique[axis].clone())
    }
}

/// Compute the trajectory for a scan specification.
///
/// Fails synchronously with [`ScanError::TrajectoryConfig`] for inconsistent
/// specifications, before any hardware interaction. `max_positions` bounds
/// the materialized step count (the configured `steps_limit`).
pub fn generate(spec: &ScanSpec, max_positions: Option<usize>) -> ScanResult<ScanPositions> {
    spec.validate()?;

    if spec.starts.is_empty() {
        return Ok(ScanPositions::from_positions(Vec::new()));
    }

    let positions = match spec.subtype {
        ScanSubtype::Linear | ScanSubtype::BackAndForth => {
            let seqs = signed_sequences(spec)?;
            check_limit(seqs.iter().map(Vec::len).product(), max_positions)?;
            cartesian(&seqs, spec.subtype == ScanSubtype::BackAndForth)
        }
        ScanSubtype::Random => {
            let seqs = oriented_sequences(spec)?;
            check_limit(seqs.iter().map(Vec::len).product(), max_positions)?;
            let mut positions = cartesian(&seqs, false);
            positions.shuffle(&mut rand::thread_rng());
            positions
        }
        ScanSubtype::Spiral => {
            let positions = spiral_positions(spec)?;
            check_limit(positions.len(), max_positions)?;
            positions
        }
        ScanSubtype::Adaptive => {
            return Err(ScanError::TrajectoryConfig(
                "Adaptive scans are not materialized up front; drive them through scan::adaptive"
                    .into(),
            ));
        }
    };

    Ok(ScanPositions::from_positions(positions))
}

fn check_limit(n_steps: usize, max_positions: Option<usize>) -> ScanResult<()> {
    if let Some(limit) = max_positions {
        if n_steps > limit {
            return Err(ScanError::TrajectoryConfig(format!(
                "Trajectory has {n_steps} steps, above the configured limit of {limit}"
            )));
        }
    }
    Ok(())
}

/// Per-axis coordinate sequences with the signed steps as given. Linear and
/// back-and-forth scans reject ambiguous step directions.
fn signed_sequences(spec: &ScanSpec) -> ScanResult<Vec<Vec<f64>>> {
    spec.starts
        .iter()
        .zip(&spec.stops)
        .zip(&spec.steps)
        .map(|((&start, &stop), &step)| linear_sequence(start, stop, step))
        .collect()
}

/// Per-axis sequences using step magnitudes oriented by `stop - start`.
/// Random (and spiral) scans have no direction ambiguity.
fn oriented_sequences(spec: &ScanSpec) -> ScanResult<Vec<Vec<f64>>> {
    spec.starts
        .iter()
        .zip(&spec.stops)
        .zip(&spec.steps)
        .map(|((&start, &stop), &step)| {
            let oriented = step.abs() * (stop - start).signum();
            linear_sequence(start, stop, oriented)
        })
        .collect()
}

/// Cartesian product with the first axis outermost. With `boustrophedon`,
/// the innermost sequence reverses whenever the sum of the outer indexes is
/// odd.
fn cartesian(seqs: &[Vec<f64>], boustrophedon: bool) -> Vec<Vec<f64>> {
    let n_axes = seqs.len();
    let total: usize = seqs.iter().map(Vec::len).product();
    if total == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(total);
    let mut odometer = vec![0usize; n_axes];
    for _ in 0..total {
        let mut row = Vec::with_capacity(n_axes);
        for (axis, seq) in seqs.iter().enumerate() {
            let mut i = odometer[axis];
            if boustrophedon && axis == n_axes - 1 {
                let outer_sum: usize = odometer[..n_axes - 1].iter().sum();
                if outer_sum % 2 == 1 {
                    i = seq.len() - 1 - i;
                }
            }
            row.push(seq[i]);
        }
        out.push(row);

        for axis in (0..n_axes).rev() {
            odometer[axis] += 1;
            if odometer[axis] < seqs[axis].len() {
                break;
            }
            odometer[axis] = 0;
        }
    }
    out
}

/// Square spiral outward from the scan's start point.
///
/// The half-side is `round(points_per_axis / 2)`; the per-axis pitch comes
/// from the explicit `rmax` (`2 * rmax / points_per_axis`) or from the step
/// magnitudes. Total step count is `(2k + 1)^2`.
fn spiral_positions(spec: &ScanSpec) -> ScanResult<Vec<Vec<f64>>> {
    let centers = [spec.starts[0], spec.starts[1]];
    let (pitch, half_side) = match (spec.points_per_axis, &spec.rmax) {
        (Some(n), Some(rmax)) => (
            [2.0 * rmax[0] / n as f64, 2.0 * rmax[1] / n as f64],
            (n as f64 / 2.0).round() as i64,
        ),
        (Some(n), None) => (
            [spec.steps[0].abs(), spec.steps[1].abs()],
            (n as f64 / 2.0).round() as i64,
        ),
        (None, Some(rmax)) => {
            let pitch = [spec.steps[0].abs(), spec.steps[1].abs()];
            if pitch[0] < 1e-12 {
                return Err(ScanError::TrajectoryConfig(
                    "Spiral with explicit rmax needs non-zero steps".into(),
                ));
            }
            (pitch, (rmax[0].abs() / pitch[0]).round() as i64)
        }
        (None, None) => {
            // validate() already rejects this
            return Err(ScanError::TrajectoryConfig(
                "Spiral scans need points_per_axis or rmax".into(),
            ));
        }
    };

    if pitch[0].abs() < 1e-12 || pitch[1].abs() < 1e-12 || half_side == 0 {
        return Ok(vec![centers.to_vec()]);
    }

    let side = 2 * half_side + 1;
    let total = (side * side) as usize;
    let mut idx1: Vec<i64> = vec![0];
    let mut idx2: Vec<i64> = vec![0];
    let mut run = 0usize;
    'outer: loop {
        let dir: i64 = if run % 2 == 1 { 1 } else { -1 };
        for _ in 0..run {
            idx1.push(idx1[idx1.len() - 1] + dir);
            idx2.push(idx2[idx2.len() - 1]);
            if idx1.len() >= total {
                break 'outer;
            }
        }
        for _ in 0..run {
            idx1.push(idx1[idx1.len() - 1]);
            idx2.push(idx2[idx2.len() - 1] + dir);
            if idx1.len() >= total {
                break 'outer;
            }
        }
        run += 1;
    }

    Ok(idx1
        .iter()
        .zip(&idx2)
        .map(|(&i, &j)| {
            vec![
                centers[0] + i as f64 * pitch[0],
                centers[1] + j as f64 * pitch[1],
            ]
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::spec::{ScanType, ScanSubtype};

    fn sorted(mut values: Vec<f64>) -> Vec<f64> {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values
    }

    #[test]
    fn linear_1d_is_inclusive() {
        let spec = ScanSpec::linear_1d(0.0, 10.0, 1.0);
        let traj = generate(&spec, None).unwrap();
        assert_eq!(traj.n_steps(), 11);
        let values: Vec<f64> = traj.positions().iter().map(|p| p[0]).collect();
        assert_eq!(values, (0..=10).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn linear_2d_first_axis_outermost() {
        let spec = ScanSpec::linear_2d([0.0, 0.0], [1.0, 2.0], [1.0, 1.0]);
        let traj = generate(&spec, None).unwrap();
        assert_eq!(traj.n_steps(), 6);
        assert_eq!(traj.position_at(0), &[0.0, 0.0]);
        assert_eq!(traj.position_at(1), &[0.0, 1.0]);
        assert_eq!(traj.position_at(2), &[0.0, 2.0]);
        assert_eq!(traj.position_at(3), &[1.0, 0.0]);
        assert_eq!(traj.scan_shape(), vec![2, 3]);
        assert_eq!(traj.nav_index_at(4), &[1, 1]);
    }

    #[test]
    fn back_and_forth_reverses_alternate_rows() {
        let spec = ScanSpec::linear_2d([0.0, 0.0], [2.0, 2.0], [1.0, 1.0])
            .with_subtype(ScanSubtype::BackAndForth);
        let traj = generate(&spec, None).unwrap();
        let inner: Vec<f64> = traj.positions().iter().map(|p| p[1]).collect();
        assert_eq!(
            inner,
            vec![0.0, 1.0, 2.0, 2.0, 1.0, 0.0, 0.0, 1.0, 2.0]
        );
        // same targets as linear, different order
        let linear = generate(&ScanSpec::linear_2d([0.0, 0.0], [2.0, 2.0], [1.0, 1.0]), None)
            .unwrap();
        assert_eq!(
            sorted(inner),
            sorted(linear.positions().iter().map(|p| p[1]).collect())
        );
    }

    #[test]
    fn random_visits_the_same_grid() {
        let linear = generate(&ScanSpec::linear_1d(0.0, 10.0, 1.0), None).unwrap();
        let random = generate(
            &ScanSpec::linear_1d(0.0, 10.0, 1.0).with_subtype(ScanSubtype::Random),
            None,
        )
        .unwrap();
        assert_eq!(random.n_steps(), linear.n_steps());
        assert_eq!(
            sorted(random.positions().iter().map(|p| p[0]).collect()),
            sorted(linear.positions().iter().map(|p| p[0]).collect())
        );
    }

    #[test]
    fn random_ignores_step_sign() {
        // Linear would reject the negative step, Random uses the magnitude.
        let mut spec = ScanSpec::linear_1d(0.0, 5.0, -1.0).with_subtype(ScanSubtype::Random);
        let traj = generate(&spec, None).unwrap();
        assert_eq!(traj.n_steps(), 6);

        spec.subtype = ScanSubtype::Linear;
        assert!(generate(&spec, None).is_err());
    }

    #[test]
    fn spiral_step_count() {
        let spec = ScanSpec::spiral([0.0, 0.0], [1.0, 1.0], 10);
        let traj = generate(&spec, None).unwrap();
        // side 2*5+1 = 11, squared
        assert_eq!(traj.n_steps(), 121);
        assert_eq!(traj.position_at(0), &[0.0, 0.0]);
        // every coordinate stays within the radius
        for p in traj.positions() {
            assert!(p[0].abs() <= 5.0 + 1e-9 && p[1].abs() <= 5.0 + 1e-9);
        }
    }

    #[test]
    fn spiral_targets_are_unique() {
        let spec = ScanSpec::spiral([1.0, -1.0], [0.5, 0.5], 6);
        let traj = generate(&spec, None).unwrap();
        assert_eq!(traj.n_steps(), 49);
        let mut seen = std::collections::HashSet::new();
        for p in traj.positions() {
            assert!(seen.insert((p[0].to_bits(), p[1].to_bits())));
        }
    }

    #[test]
    fn single_point_axis_collapses() {
        let spec = ScanSpec::linear_2d([0.0, 3.0], [2.0, 3.0], [1.0, -1.0]);
        let traj = generate(&spec, None).unwrap();
        assert_eq!(traj.n_steps(), 3);
        assert!(traj.positions().iter().all(|p| p[1] == 3.0));
    }

    #[test]
    fn empty_actuator_list_yields_zero_steps() {
        let spec = ScanSpec {
            scan_type: ScanType::Sequential,
            subtype: ScanSubtype::Linear,
            starts: vec![],
            stops: vec![],
            steps: vec![],
            rmax: None,
            points_per_axis: None,
        };
        let traj = generate(&spec, None).unwrap();
        assert_eq!(traj.n_steps(), 0);
    }

    #[test]
    fn steps_limit_is_enforced() {
        let spec = ScanSpec::linear_1d(0.0, 10.0, 1.0);
        assert!(generate(&spec, Some(10)).is_err());
        assert!(generate(&spec, Some(11)).is_ok());
    }

    #[test]
    fn adaptive_is_not_materialized() {
        let spec = ScanSpec::linear_1d(0.0, 1.0, 0.1).with_subtype(ScanSubtype::Adaptive);
        assert!(matches!(
            generate(&spec, None),
            Err(ScanError::TrajectoryConfig(_))
        ));
    }

    #[test]
    fn axes_unique_keeps_first_appearance_order() {
        let traj = ScanPositions::from_positions(vec![
            vec![2.0, 0.0],
            vec![1.0, 0.0],
            vec![2.0, 1.0],
        ]);
        assert_eq!(traj.axes_unique()[0], vec![2.0, 1.0]);
        assert_eq!(traj.axes_unique()[1], vec![0.0, 1.0]);
        assert_eq!(traj.nav_index_at(2), &[0, 1]);
    }
}
