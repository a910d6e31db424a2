//! Multi-channel N-dimensional data containers.
//!
//! A [`DataContainer`] is the unit of data exchanged between the acquisition
//! engine, storage and display: one or more equally-shaped arrays
//! ("channels"), the axes describing each array dimension, and a partition of
//! dimensions into navigation (scan) and signal directions.
//!
//! Containers are immutable after construction except for the explicit
//! [`DataContainer::append_nav`] operation used by enlargeable storage. All
//! construction paths validate the dimensionality invariants, so a container
//! in hand is always internally consistent.

use crate::data::axis::{float_eq, Axis};
use crate::error::{ScanError, ScanResult};
use ndarray::{ArrayD, Axis as NdAxis};
use serde::{Deserialize, Serialize};

/// How navigation coordinates cover the scanned space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Grid-like navigation axes.
    Uniform,
    /// Non-gridded navigation (adaptive or shuffled acquisition).
    Spread,
}

/// Provenance of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Produced directly by an acquisition.
    Raw,
    /// Derived from raw data by a post-processing step.
    Calculated,
}

/// Derived dimensionality of the signal part of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDim {
    /// All signal dimensions have size 1 (a scalar per scan point).
    D0,
    /// One non-trivial signal dimension (e.g. a spectrum).
    D1,
    /// Two non-trivial signal dimensions (e.g. a camera frame).
    D2,
    /// More than two non-trivial signal dimensions.
    Nd,
}

/// Multi-channel N-dimensional data with axes and a nav/signal partition.
///
/// Deserialization goes through [`RawContainer`] so loaded data passes the
/// same `check()` as constructed data; a tampered or truncated file is an
/// error, not a panic later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawContainer")]
pub struct DataContainer {
    /// Container name (typically the detector identifier).
    pub name: String,
    data: Vec<ArrayD<f64>>,
    axes: Vec<Axis>,
    nav_indexes: Vec<usize>,
    /// Whether navigation coordinates form a grid.
    pub distribution: Distribution,
    /// Raw acquisition or calculated data.
    pub source: DataSource,
    labels: Vec<String>,
    /// Acquisition timestamp, seconds since the UNIX epoch.
    pub timestamp: f64,
}

/// Unvalidated mirror of [`DataContainer`] used as the deserialization
/// target. Field names and order match the serialized form.
#[derive(Deserialize)]
struct RawContainer {
    name: String,
    data: Vec<ArrayD<f64>>,
    axes: Vec<Axis>,
    nav_indexes: Vec<usize>,
    distribution: Distribution,
    source: DataSource,
    labels: Vec<String>,
    timestamp: f64,
}

impl TryFrom<RawContainer> for DataContainer {
    type Error = ScanError;

    fn try_from(raw: RawContainer) -> ScanResult<Self> {
        let container = Self {
            name: raw.name,
            data: raw.data,
            axes: raw.axes,
            nav_indexes: raw.nav_indexes,
            distribution: raw.distribution,
            source: raw.source,
            labels: raw.labels,
            timestamp: raw.timestamp,
        };
        container.check()?;
        Ok(container)
    }
}

impl DataContainer {
    /// Create a raw, uniform container with auto-generated channel labels.
    pub fn new(name: impl Into<String>, data: Vec<ArrayD<f64>>) -> ScanResult<Self> {
        let labels = (0..data.len()).map(|i| format!("CH{i:02}")).collect();
        let container = Self {
            name: name.into(),
            data,
            axes: Vec::new(),
            nav_indexes: Vec::new(),
            distribution: Distribution::Uniform,
            source: DataSource::Raw,
            labels,
            timestamp: now_timestamp(),
        };
        container.check()?;
        Ok(container)
    }

    /// Replace the auto-generated channel labels. One label per channel.
    pub fn with_labels(mut self, labels: Vec<String>) -> ScanResult<Self> {
        if labels.len() != self.data.len() {
            return Err(ScanError::InvalidData(format!(
                "{} labels given for {} channels",
                labels.len(),
                self.data.len()
            )));
        }
        self.labels = labels;
        Ok(self)
    }

    /// Attach axes. Axis indexes must stay within the array rank; only axes
    /// carrying a `spread_order` may share a dimension.
    pub fn with_axes(mut self, axes: Vec<Axis>) -> ScanResult<Self> {
        self.axes = axes;
        self.check()?;
        Ok(self)
    }

    /// Declare which array dimensions are navigation directions.
    pub fn with_nav_indexes(mut self, nav_indexes: Vec<usize>) -> ScanResult<Self> {
        self.nav_indexes = nav_indexes;
        self.check()?;
        Ok(self)
    }

    /// Set the distribution kind. `Spread` requires every navigation
    /// dimension to be described by spread-ordered axes of matching length.
    pub fn with_distribution(mut self, distribution: Distribution) -> ScanResult<Self> {
        self.distribution = distribution;
        self.check()?;
        Ok(self)
    }

    /// Set the provenance.
    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    /// Override the acquisition timestamp.
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn check(&self) -> ScanResult<()> {
        let Some(first) = self.data.first() else {
            return Err(ScanError::InvalidData("Container has no channels".into()));
        };
        let shape = first.shape();
        for (i, arr) in self.data.iter().enumerate() {
            if arr.shape() != shape {
                return Err(ScanError::InvalidData(format!(
                    "Channel {i} has shape {:?}, expected {shape:?}",
                    arr.shape()
                )));
            }
        }
        if self.labels.len() != self.data.len() {
            return Err(ScanError::InvalidData(format!(
                "{} labels for {} channels",
                self.labels.len(),
                self.data.len()
            )));
        }

        for axis in &self.axes {
            if axis.index >= shape.len() {
                return Err(ScanError::InvalidData(format!(
                    "Axis '{}' indexes dimension {} of a rank-{} array",
                    axis.label,
                    axis.index,
                    shape.len()
                )));
            }
            if axis.len() != shape[axis.index] {
                return Err(ScanError::InvalidData(format!(
                    "Axis '{}' has {} points but dimension {} has size {}",
                    axis.label,
                    axis.len(),
                    axis.index,
                    shape[axis.index]
                )));
            }
        }
        // Only spread-ordered axes may share a dimension.
        for (i, a) in self.axes.iter().enumerate() {
            for b in self.axes.iter().skip(i + 1) {
                if a.index == b.index && (a.spread_order.is_none() || b.spread_order.is_none()) {
                    return Err(ScanError::InvalidData(format!(
                        "Axes '{}' and '{}' both describe dimension {}",
                        a.label, b.label, a.index
                    )));
                }
            }
        }

        for &nav in &self.nav_indexes {
            if nav >= shape.len() {
                return Err(ScanError::InvalidData(format!(
                    "Navigation index {nav} out of range for rank {}",
                    shape.len()
                )));
            }
        }
        let mut sorted = self.nav_indexes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.nav_indexes.len() {
            return Err(ScanError::InvalidData(
                "Duplicate navigation indexes".into(),
            ));
        }

        if self.distribution == Distribution::Spread {
            for &nav in &self.nav_indexes {
                let spread_axes: Vec<&Axis> = self
                    .axes
                    .iter()
                    .filter(|a| a.index == nav && a.spread_order.is_some())
                    .collect();
                if spread_axes.is_empty() {
                    return Err(ScanError::InvalidData(format!(
                        "Spread distribution but no spread-ordered axis for dimension {nav}"
                    )));
                }
                let len = spread_axes[0].len();
                if spread_axes.iter().any(|a| a.len() != len) {
                    return Err(ScanError::InvalidData(
                        "Spread axes have mismatched lengths".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Channel arrays, all of identical shape.
    pub fn data(&self) -> &[ArrayD<f64>] {
        &self.data
    }

    /// All attached axes.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Navigation dimension indexes.
    pub fn nav_indexes(&self) -> &[usize] {
        &self.nav_indexes
    }

    /// Channel labels, one per channel.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Shape shared by all channels.
    pub fn shape(&self) -> &[usize] {
        self.data[0].shape()
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    /// Sizes of the navigation dimensions, in `nav_indexes` order.
    pub fn nav_shape(&self) -> Vec<usize> {
        let shape = self.shape();
        self.nav_indexes.iter().map(|&i| shape[i]).collect()
    }

    /// Sizes of the signal (non-navigation) dimensions.
    pub fn sig_shape(&self) -> Vec<usize> {
        let shape = self.shape();
        (0..shape.len())
            .filter(|d| !self.nav_indexes.contains(d))
            .map(|d| shape[d])
            .collect()
    }

    /// Axes describing navigation dimensions.
    pub fn nav_axes(&self) -> Vec<&Axis> {
        self.axes
            .iter()
            .filter(|a| self.nav_indexes.contains(&a.index))
            .collect()
    }

    /// Axes describing signal dimensions.
    pub fn sig_axes(&self) -> Vec<&Axis> {
        self.axes
            .iter()
            .filter(|a| !self.nav_indexes.contains(&a.index))
            .collect()
    }

    /// Derived dimensionality of the signal part. Never stored.
    pub fn dim(&self) -> DataDim {
        let non_trivial = self.sig_shape().iter().filter(|&&s| s > 1).count();
        match non_trivial {
            0 => DataDim::D0,
            1 => DataDim::D1,
            2 => DataDim::D2,
            _ => DataDim::Nd,
        }
    }

    /// Extract the signal data at one navigation position.
    ///
    /// `nav_position` gives one index per navigation dimension, in
    /// `nav_indexes` order. The result keeps the signal axes (reindexed to
    /// the collapsed rank) and is marked [`DataSource::Calculated`].
    pub fn slice_at_nav(&self, nav_position: &[usize]) -> ScanResult<DataContainer> {
        if nav_position.len() != self.nav_indexes.len() {
            return Err(ScanError::InvalidData(format!(
                "{} navigation indexes given, container has {}",
                nav_position.len(),
                self.nav_indexes.len()
            )));
        }
        let shape = self.shape();
        for (&dim, &idx) in self.nav_indexes.iter().zip(nav_position) {
            if idx >= shape[dim] {
                return Err(ScanError::InvalidData(format!(
                    "Index {idx} out of range for navigation dimension {dim} (size {})",
                    shape[dim]
                )));
            }
        }

        // Collapse navigation dimensions from the highest down so earlier
        // indexes stay valid.
        let mut pairs: Vec<(usize, usize)> = self
            .nav_indexes
            .iter()
            .copied()
            .zip(nav_position.iter().copied())
            .collect();
        pairs.sort_by(|a, b| b.0.cmp(&a.0));

        let mut sliced = Vec::with_capacity(self.data.len());
        for arr in &self.data {
            let mut view = arr.clone();
            for &(dim, idx) in &pairs {
                view = view.index_axis(NdAxis(dim), idx).to_owned();
            }
            sliced.push(view);
        }

        let remap = |old: usize| -> usize {
            old - self.nav_indexes.iter().filter(|&&n| n < old).count()
        };
        let axes = self
            .sig_axes()
            .into_iter()
            .map(|a| a.clone().at_index(remap(a.index)))
            .collect();

        DataContainer::new(self.name.clone(), sliced)?
            .with_labels(self.labels.clone())?
            .with_axes(axes)
            .map(|c| c.with_source(DataSource::Calculated))
    }

    /// Append another container along navigation dimension 0.
    ///
    /// Used by enlargeable storage: `other` must have the same channels and
    /// signal shape. When `other` has no navigation dimension it is treated
    /// as a single scan point.
    pub fn append_nav(&mut self, other: &DataContainer) -> ScanResult<()> {
        if self.nav_indexes != [0] {
            return Err(ScanError::InvalidData(
                "append_nav requires navigation dimension 0".into(),
            ));
        }
        if other.n_channels() != self.n_channels() {
            return Err(ScanError::InvalidData(format!(
                "Cannot append {} channels to {}",
                other.n_channels(),
                self.n_channels()
            )));
        }
        for (i, (mine, theirs)) in self.data.iter_mut().zip(other.data.iter()).enumerate() {
            let incoming = if theirs.ndim() + 1 == mine.ndim() {
                theirs.clone().insert_axis(NdAxis(0))
            } else {
                theirs.clone()
            };
            if incoming.shape()[1..] != mine.shape()[1..] {
                return Err(ScanError::InvalidData(format!(
                    "Channel {i} signal shape mismatch on append"
                )));
            }
            *mine = ndarray::concatenate(NdAxis(0), &[mine.view(), incoming.view()])
                .map_err(|e| ScanError::InvalidData(e.to_string()))?;
        }
        // The nav axis no longer matches the grown dimension; callers
        // rebuild it when the scan completes.
        self.axes.retain(|a| a.index != 0);
        Ok(())
    }
}

impl PartialEq for DataContainer {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps are excluded: equality is by value.
        self.name == other.name
            && self.labels == other.labels
            && self.nav_indexes == other.nav_indexes
            && self.distribution == other.distribution
            && self.source == other.source
            && self.axes == other.axes
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| {
                    a.shape() == b.shape()
                        && a.iter().zip(b.iter()).all(|(x, y)| float_eq(*x, *y))
                })
    }
}

fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
