//! Loss-driven adaptive sampling.
//!
//! Unlike the grid trajectories, an adaptive scan decides each target from
//! the measurements so far: the scanned interval is repeatedly bisected
//! where the sampled curve is least resolved. The sampler is lazy and
//! finite; once it reports exhaustion it stays exhausted.
//!
//! Usage alternates [`AdaptiveScan::next_position`] and
//! [`AdaptiveScan::tell`]. Asking for the next position again before telling
//! returns the outstanding target unchanged.

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};

/// Termination criteria for an adaptive scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveStop {
    /// Hard cap on the number of sampled positions.
    pub max_points: usize,
    /// Stop early once every interval's loss drops to this value.
    pub loss_goal: Option<f64>,
}

/// One sampled point, kept sorted by position.
#[derive(Debug, Clone, Copy)]
struct Sample {
    position: f64,
    value: f64,
}

/// Single-axis adaptive sampler.
///
/// The loss of an interval between two sampled points is the product of its
/// width and the absolute value difference across it; the widest interval
/// breaks ties so flat regions still get refined. The largest-loss interval
/// is bisected next.
#[derive(Debug)]
pub struct AdaptiveScan {
    start: f64,
    stop: f64,
    stop_rule: AdaptiveStop,
    samples: Vec<Sample>,
    visited: Vec<f64>,
    pending: Option<f64>,
    issued: usize,
    exhausted: bool,
}

impl AdaptiveScan {
    /// Create a sampler over one actuator axis.
    ///
    /// Multi-axis adaptive scans are not supported; passing more than one
    /// axis is a configuration error.
    pub fn new(starts: &[f64], stops: &[f64], stop_rule: AdaptiveStop) -> ScanResult<Self> {
        if starts.len() != 1 || stops.len() != 1 {
            return Err(ScanError::TrajectoryConfig(format!(
                "Adaptive scans drive a single actuator axis, got {} start(s) and {} stop(s)",
                starts.len(),
                stops.len()
            )));
        }
        if starts[0] == stops[0] {
            return Err(ScanError::TrajectoryConfig(
                "Adaptive scan bounds must span a non-empty interval".into(),
            ));
        }
        if stop_rule.max_points < 2 {
            return Err(ScanError::TrajectoryConfig(
                "Adaptive scans need max_points >= 2 to sample both bounds".into(),
            ));
        }
        Ok(Self {
            start: starts[0].min(stops[0]),
            stop: starts[0].max(stops[0]),
            stop_rule,
            samples: Vec::new(),
            visited: Vec::new(),
            pending: None,
            issued: 0,
            exhausted: false,
        })
    }

    /// Next target position, or `None` once the stop rule is met.
    pub fn next_position(&mut self) -> Option<Vec<f64>> {
        if let Some(pending) = self.pending {
            return Some(vec![pending]);
        }
        if self.exhausted || self.issued >= self.stop_rule.max_points {
            self.exhausted = true;
            return None;
        }

        let target = match self.issued {
            0 => self.start,
            1 => self.stop,
            _ => {
                let (left, right, loss) = self.worst_interval()?;
                if let Some(goal) = self.stop_rule.loss_goal {
                    if loss <= goal {
                        self.exhausted = true;
                        return None;
                    }
                }
                (left + right) / 2.0
            }
        };

        self.pending = Some(target);
        self.issued += 1;
        Some(vec![target])
    }

    /// Feed back the measured value for a previously issued position.
    pub fn tell(&mut self, position: &[f64], measured: f64) -> ScanResult<()> {
        let expected = self.pending.ok_or_else(|| {
            ScanError::TrajectoryConfig("tell() without an outstanding adaptive target".into())
        })?;
        let position = *position.first().ok_or_else(|| {
            ScanError::TrajectoryConfig("Adaptive feedback carries one coordinate".into())
        })?;
        if position != expected {
            return Err(ScanError::TrajectoryConfig(format!(
                "Adaptive feedback for {position}, expected {expected}"
            )));
        }
        self.pending = None;
        self.visited.push(position);
        let at = self
            .samples
            .partition_point(|sample| sample.position < position);
        self.samples.insert(at, Sample { position, value: measured });
        Ok(())
    }

    /// Positions sampled so far, in visit order. These become the spread
    /// navigation axis of the resulting data.
    pub fn visited(&self) -> &[f64] {
        &self.visited
    }

    /// Number of positions issued so far.
    pub fn n_issued(&self) -> usize {
        self.issued
    }

    /// The termination criteria this sampler was built with.
    pub fn stop_rule(&self) -> AdaptiveStop {
        self.stop_rule
    }

    fn worst_interval(&self) -> Option<(f64, f64, f64)> {
        self.samples
            .windows(2)
            .map(|pair| {
                let width = pair[1].position - pair[0].position;
                let loss = width * (pair[1].value - pair[0].value).abs();
                (pair[0].position, pair[1].position, loss, width)
            })
            .max_by(|a, b| {
                (a.2, a.3)
                    .partial_cmp(&(b.2, b.3))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(left, right, loss, _)| (left, right, loss))
    }
}
