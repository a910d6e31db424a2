//! Incremental per-channel averaging.
//!
//! The accumulator holds one running mean per `(detector, channel)` key and
//! updates it with the numerically stable incremental form
//! `mean += (x - mean) / n`, so a full copy of the samples is never kept.
//! The coordinator folds every repeat of a step through it, finalizes, and
//! clears before the next step.

use crate::error::{ScanError, ScanResult};
use ndarray::ArrayD;
use std::collections::HashMap;

/// Identifies one channel of one detector within a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub detector: String,
    pub channel: usize,
}

impl ChannelKey {
    pub fn new(detector: impl Into<String>, channel: usize) -> Self {
        Self {
            detector: detector.into(),
            channel,
        }
    }
}

#[derive(Debug, Clone)]
struct RunningMean {
    mean: ArrayD<f64>,
    count: usize,
}

/// Running means for all channels of the current scan step.
#[derive(Debug, Default)]
pub struct AveragingAccumulator {
    channels: HashMap<ChannelKey, RunningMean>,
}

impl AveragingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the running mean for `key`.
    ///
    /// The first sample fixes the channel shape; a later mismatch is a fatal
    /// [`ScanError::AveragingState`] because it means the detector changed
    /// its output mid-step.
    pub fn add(&mut self, key: ChannelKey, sample: &ArrayD<f64>) -> ScanResult<()> {
        match self.channels.get_mut(&key) {
            None => {
                self.channels.insert(
                    key,
                    RunningMean {
                        mean: sample.clone(),
                        count: 1,
                    },
                );
            }
            Some(running) => {
                if running.mean.shape() != sample.shape() {
                    return Err(ScanError::AveragingState(format!(
                        "Channel {}[{}] changed shape from {:?} to {:?} while averaging",
                        key.detector,
                        key.channel,
                        running.mean.shape(),
                        sample.shape()
                    )));
                }
                running.count += 1;
                let n = running.count as f64;
                running
                    .mean
                    .zip_mut_with(sample, |mean, &x| *mean += (x - *mean) / n);
            }
        }
        Ok(())
    }

    /// Current means, keyed by channel. Non-destructive; the accumulator
    /// keeps folding until [`AveragingAccumulator::clear`].
    pub fn finalize(&self) -> HashMap<ChannelKey, ArrayD<f64>> {
        self.channels
            .iter()
            .map(|(key, running)| (key.clone(), running.mean.clone()))
            .collect()
    }

    /// Number of samples folded for `key` so far.
    pub fn count(&self, key: &ChannelKey) -> usize {
        self.channels.get(key).map_or(0, |running| running.count)
    }

    /// Drop all state for the next step.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
