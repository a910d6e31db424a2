//! Mock hardware for tests and the simulated CLI run.
//!
//! The mocks share position state through `Arc<RwLock<f64>>`: the actuator
//! writes it when a move settles, detectors read it to synthesize a
//! response. Latency and stalling are configurable so timeout and ordering
//! behavior can be exercised deterministically.

use crate::data::DataContainer;
use crate::hardware::capabilities::{Actuator, Detector, PersistenceSink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Simulated actuator with a fixed settle time.
pub struct MockActuator {
    id: String,
    position: Arc<RwLock<f64>>,
    settle: Duration,
    stalled: AtomicBool,
}

impl MockActuator {
    pub fn new(id: impl Into<String>, settle: Duration) -> Self {
        Self {
            id: id.into(),
            position: Arc::new(RwLock::new(0.0)),
            settle,
            stalled: AtomicBool::new(false),
        }
    }

    /// Shared position handle for detectors that respond to it.
    pub fn position_handle(&self) -> Arc<RwLock<f64>> {
        Arc::clone(&self.position)
    }

    /// Make every subsequent move hang until the caller times out.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Clear a previous [`MockActuator::stall`].
    pub fn unstall(&self) {
        self.stalled.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Actuator for MockActuator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn move_abs(&self, position: f64) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            // Way past any sensible move timeout.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.settle).await;
        *self.position.write().await = position;
        Ok(())
    }

    async fn get_value(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }
}

/// Response function turning the current position into one channel array.
pub type Response = dyn Fn(f64) -> ArrayD<f64> + Send + Sync;

/// Simulated detector reading a shared position.
pub struct MockDetector {
    id: String,
    position: Arc<RwLock<f64>>,
    response: Arc<Response>,
    latency: Duration,
    jitter: Duration,
}

impl MockDetector {
    pub fn new(
        id: impl Into<String>,
        position: Arc<RwLock<f64>>,
        response: impl Fn(f64) -> ArrayD<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            position,
            response: Arc::new(response),
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Scalar detector: one single-element channel computed from the position.
    pub fn scalar(
        id: impl Into<String>,
        position: Arc<RwLock<f64>>,
        f: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self::new(id, position, move |x| {
            ArrayD::from_elem(IxDyn(&[1]), f(x))
        })
    }

    /// Fixed per-grab latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Additional random latency, uniform in `0..jitter`. Lets tests drive
    /// detectors out of order within a step barrier.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn grab(&self, _n_average: usize) -> Result<DataContainer> {
        let extra = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.jitter)
        };
        tokio::time::sleep(self.latency + extra).await;
        let position = *self.position.read().await;
        let data = (self.response)(position);
        DataContainer::new(self.id.clone(), vec![data]).map_err(|e| anyhow!(e))
    }
}

#[derive(Default)]
struct MemorySinkState {
    by_index: HashMap<Vec<usize>, DataContainer>,
    log: Vec<Vec<usize>>,
    failing: bool,
}

/// In-memory persistence sink recording every append.
///
/// Writes are keyed by navigation index with last-write-wins semantics; the
/// append log keeps the arrival order for ordering assertions.
#[derive(Default)]
pub struct MemorySink {
    state: RwLock<MemorySinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail until called again with `false`.
    pub async fn set_failing(&self, failing: bool) {
        self.state.write().await.failing = failing;
    }

    /// Number of distinct navigation indexes written.
    pub async fn len(&self) -> usize {
        self.state.read().await.by_index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Container last written at a navigation index.
    pub async fn get(&self, nav_index: &[usize]) -> Option<DataContainer> {
        self.state.read().await.by_index.get(nav_index).cloned()
    }

    /// Navigation indexes in append order, retries included.
    pub async fn append_order(&self) -> Vec<Vec<usize>> {
        self.state.read().await.log.clone()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn append(&self, container: &DataContainer, nav_index: &[usize]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.failing {
            return Err(anyhow!("simulated storage failure at {nav_index:?}"));
        }
        state.log.push(nav_index.to_vec());
        state.by_index.insert(nav_index.to_vec(), container.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn actuator_settles_and_reports_position() {
        let actuator = MockActuator::new("stage", Duration::from_millis(1));
        actuator.move_abs(2.5).await.unwrap();
        assert_eq!(actuator.get_value().await.unwrap(), 2.5);
    }

    #[tokio::test]
    async fn detector_responds_to_position() {
        let actuator = MockActuator::new("stage", Duration::ZERO);
        let detector = MockDetector::scalar("photodiode", actuator.position_handle(), |x| x * x);
        actuator.move_abs(3.0).await.unwrap();
        let container = detector.grab(1).await.unwrap();
        assert_eq!(container.data()[0][[0]], 9.0);
    }

    #[tokio::test]
    async fn memory_sink_last_write_wins() {
        let sink = MemorySink::new();
        let actuator = MockActuator::new("stage", Duration::ZERO);
        let detector = MockDetector::scalar("pd", actuator.position_handle(), |x| x);

        actuator.move_abs(1.0).await.unwrap();
        let first = detector.grab(1).await.unwrap();
        sink.append(&first, &[0]).await.unwrap();

        actuator.move_abs(2.0).await.unwrap();
        let second = detector.grab(1).await.unwrap();
        sink.append(&second, &[0]).await.unwrap();

        assert_eq!(sink.len().await, 1);
        assert_eq!(sink.get(&[0]).await.unwrap().data()[0][[0]], 2.0);
        assert_eq!(sink.append_order().await, vec![vec![0], vec![0]]);
    }

    #[tokio::test]
    async fn failing_sink_reports_errors() {
        let sink = MemorySink::new();
        sink.set_failing(true).await;
        let container =
            DataContainer::new("det", vec![ArrayD::from_elem(IxDyn(&[1]), 0.0)]).unwrap();
        assert!(sink.append(&container, &[0]).await.is_err());
        sink.set_failing(false).await;
        assert!(sink.append(&container, &[0]).await.is_ok());
    }
}
