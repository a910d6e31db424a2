//! The scan coordinator: a single state machine owning the acquisition loop.
//!
//! One tokio task drives the scan; per-actuator moves and per-detector grabs
//! run in spawned tasks that report back through an mpsc channel. The
//! coordinator advances only when the full expected responder set for the
//! current step has arrived (a join barrier), so a slow detector delays the
//! step but can never reorder the emitted data.
//!
//! Every barrier is tagged with a generation counter. An event from an
//! earlier generation (a reply arriving after its barrier timed out) is
//! logged and discarded, never mistaken for the current step.
//!
//! State is published on a `watch` channel, per-step results on a
//! `broadcast` channel. Cooperative stop is a `watch<bool>` consulted at
//! every state boundary; a step still in flight when the flag is raised is
//! drained and discarded, never persisted or emitted.

use crate::config::EngineConfig;
use crate::data::{Axis, DataContainer, Distribution};
use crate::engine::accumulator::{AveragingAccumulator, ChannelKey};
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Actuator, Detector, PersistenceSink};
use crate::scan::adaptive::{AdaptiveScan, AdaptiveStop};
use crate::scan::spec::{ScanSpec, ScanSubtype};
use crate::scan::trajectory::{self, ScanPositions};
use ndarray::{ArrayD, Axis as NdAxis};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Coordinator state, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No scan running; `start()` will be accepted.
    Idle,
    /// Request accepted, trajectory generated, scan task spawning.
    Starting,
    /// Waiting on the move barrier for the current step.
    MovingActuators,
    /// Waiting on the grab barrier for the current step.
    WaitingDetectors,
    /// Folding detector data into the running means.
    Averaging,
    /// Step complete, advancing to the next target.
    Advancing,
    /// Stop requested or fatal error; unwinding.
    Stopping,
    /// Scan ran to completion; finalizing.
    Finishing,
}

/// Everything needed to start a scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Geometry and trajectory ordering.
    pub spec: ScanSpec,
    /// Software averaging: repeats of move+grab per step. Minimum 1.
    pub n_average: usize,
    /// Termination criteria, required for adaptive scans.
    pub adaptive: Option<AdaptiveStop>,
}

impl ScanRequest {
    pub fn new(spec: ScanSpec) -> Self {
        Self {
            spec,
            n_average: 1,
            adaptive: None,
        }
    }

    /// Repeat each step `n_average` times and emit the per-channel mean.
    pub fn with_averaging(mut self, n_average: usize) -> Self {
        self.n_average = n_average;
        self
    }

    /// Termination criteria for an adaptive scan.
    pub fn with_adaptive(mut self, stop: AdaptiveStop) -> Self {
        self.adaptive = Some(stop);
        self
    }
}

/// One entry of the per-step status stream.
///
/// Emitted exactly once per completed step, in step order. A scan that
/// aborts emits one final entry with `error` set and `step_index` pointing
/// at the last step that completed (0 when none did).
#[derive(Debug, Clone)]
pub struct ScanStatus {
    pub scan_id: Uuid,
    pub step_index: usize,
    /// Total steps; for adaptive scans, the `max_points` bound.
    pub n_steps: usize,
    /// Grid index of this step within the scanned space.
    pub nav_index: Vec<usize>,
    /// One finalized container per detector.
    pub containers: Vec<DataContainer>,
    /// Set when the persistence sink rejected this step's append.
    pub persistence_degraded: bool,
    pub error: Option<String>,
    /// Index of the most recent successfully completed step. For a per-step
    /// entry this is the step itself; on the terminal entry of a failed scan
    /// it is where to resume from, `None` when no step completed (then
    /// `nav_index` is empty too).
    pub last_completed: Option<usize>,
}

/// Completion notice from a spawned move or grab task.
///
/// Hardware errors travel as strings; the barrier converts them back into
/// [`ScanError::Hardware`] naming the module.
enum StepEvent {
    MoveDone {
        actuator: String,
        generation: u64,
        result: Result<(), String>,
    },
    DataReady {
        detector: String,
        generation: u64,
        result: Result<DataContainer, String>,
    },
}

enum Plan {
    Grid(ScanPositions),
    Adaptive(AdaptiveScan),
}

/// Shared context moved into the scan task.
struct ScanContext {
    scan_id: Uuid,
    n_average: usize,
    actuators: Vec<Arc<dyn Actuator>>,
    detectors: Vec<Arc<dyn Detector>>,
    sink: Arc<dyn PersistenceSink>,
    config: EngineConfig,
    state_tx: watch::Sender<ScanState>,
    status_tx: broadcast::Sender<ScanStatus>,
    stop_rx: watch::Receiver<bool>,
}

/// Finalized per-detector data for one step.
struct DetectorData {
    name: String,
    labels: Vec<String>,
    arrays: Vec<ArrayD<f64>>,
}

/// Owns the hardware collaborators and runs at most one scan at a time.
pub struct ScanCoordinator {
    config: EngineConfig,
    actuators: Vec<Arc<dyn Actuator>>,
    detectors: Vec<Arc<dyn Detector>>,
    sink: Arc<dyn PersistenceSink>,
    state_tx: watch::Sender<ScanState>,
    status_tx: broadcast::Sender<ScanStatus>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<ScanResult<usize>>>>,
}

impl ScanCoordinator {
    pub fn new(
        config: EngineConfig,
        actuators: Vec<Arc<dyn Actuator>>,
        detectors: Vec<Arc<dyn Detector>>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ScanState::Idle);
        let (status_tx, _) = broadcast::channel(256);
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            actuators,
            detectors,
            sink,
            state_tx,
            status_tx,
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Start a scan. Fails with [`ScanError::Busy`] while one is running and
    /// with [`ScanError::TrajectoryConfig`] for an inconsistent request,
    /// before any hardware is touched.
    pub async fn start(&self, request: ScanRequest) -> ScanResult<Uuid> {
        let mut slot = self.task.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return Err(ScanError::Busy);
            }
        }

        request.spec.validate()?;
        if request.n_average == 0 {
            return Err(ScanError::TrajectoryConfig(
                "n_average must be at least 1".into(),
            ));
        }
        if self.detectors.is_empty() {
            return Err(ScanError::TrajectoryConfig(
                "A scan needs at least one detector".into(),
            ));
        }

        let plan = if request.spec.subtype == ScanSubtype::Adaptive {
            let stop = request.adaptive.ok_or_else(|| {
                ScanError::TrajectoryConfig(
                    "Adaptive scans need termination criteria (AdaptiveStop)".into(),
                )
            })?;
            if self.actuators.len() != 1 {
                return Err(ScanError::TrajectoryConfig(format!(
                    "Adaptive scans drive one actuator, {} are registered",
                    self.actuators.len()
                )));
            }
            Plan::Adaptive(AdaptiveScan::new(
                &request.spec.starts,
                &request.spec.stops,
                stop,
            )?)
        } else {
            if request.spec.n_axes() != self.actuators.len() {
                return Err(ScanError::TrajectoryConfig(format!(
                    "Scan describes {} axes but {} actuators are registered",
                    request.spec.n_axes(),
                    self.actuators.len()
                )));
            }
            Plan::Grid(trajectory::generate(
                &request.spec,
                Some(self.config.trajectory.steps_limit),
            )?)
        };

        let scan_id = Uuid::new_v4();
        self.stop_tx.send_replace(false);
        self.state_tx.send_replace(ScanState::Starting);

        let ctx = ScanContext {
            scan_id,
            n_average: request.n_average,
            actuators: self.actuators.clone(),
            detectors: self.detectors.clone(),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            state_tx: self.state_tx.clone(),
            status_tx: self.status_tx.clone(),
            stop_rx: self.stop_tx.subscribe(),
        };
        *slot = Some(tokio::spawn(run_scan(ctx, plan)));
        Ok(scan_id)
    }

    /// Request a cooperative stop. The running scan drains whatever barrier
    /// is in flight, discards that step without persisting or emitting it,
    /// and unwinds. No-op when idle.
    pub fn stop(&self) {
        info!("stop requested");
        self.stop_tx.send_replace(true);
    }

    /// Wait for the running scan to finish and return how many steps
    /// completed. Returns immediately when no scan was started.
    pub async fn wait(&self) -> ScanResult<usize> {
        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| ScanError::Internal(e.to_string()))?,
            None => Ok(0),
        }
    }

    /// Subscribe to the per-step status stream.
    pub fn subscribe_status(&self) -> broadcast::Receiver<ScanStatus> {
        self.status_tx.subscribe()
    }

    /// Watch coordinator state transitions.
    pub fn state(&self) -> watch::Receiver<ScanState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot.
    pub fn current_state(&self) -> ScanState {
        *self.state_tx.borrow()
    }
}

async fn run_scan(ctx: ScanContext, plan: Plan) -> ScanResult<usize> {
    info!(scan_id = %ctx.scan_id, "scan started");
    let n_steps_total = match &plan {
        Plan::Grid(traj) => traj.n_steps(),
        Plan::Adaptive(scan) => scan.stop_rule().max_points,
    };
    let mut completed = 0usize;
    let mut last_completed: Option<(usize, Vec<usize>)> = None;
    let result = execute(&ctx, plan, &mut completed, &mut last_completed).await;

    match &result {
        Ok(steps) => {
            ctx.state_tx.send_replace(ScanState::Finishing);
            info!(scan_id = %ctx.scan_id, steps, "scan finished");
        }
        Err(err) => {
            ctx.state_tx.send_replace(ScanState::Stopping);
            warn!(scan_id = %ctx.scan_id, error = %err, completed, "scan aborted");
            // The single terminal status of a failed scan; it names the
            // last completed step so a caller can resume from there.
            let (step_index, nav_index) = match &last_completed {
                Some((step, nav)) => (*step, nav.clone()),
                None => (0, Vec::new()),
            };
            let _ = ctx.status_tx.send(ScanStatus {
                scan_id: ctx.scan_id,
                step_index,
                n_steps: n_steps_total,
                nav_index,
                containers: Vec::new(),
                persistence_degraded: false,
                error: Some(err.to_string()),
                last_completed: last_completed.as_ref().map(|(step, _)| *step),
            });
        }
    }
    ctx.state_tx.send_replace(ScanState::Idle);
    result
}

async fn execute(
    ctx: &ScanContext,
    plan: Plan,
    completed: &mut usize,
    last_completed: &mut Option<(usize, Vec<usize>)>,
) -> ScanResult<usize> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut accumulator = AveragingAccumulator::new();
    let mut generation = 0u64;

    match plan {
        Plan::Grid(traj) => {
            let n_steps = traj.n_steps();
            for step in 0..n_steps {
                if *ctx.stop_rx.borrow() {
                    info!(scan_id = %ctx.scan_id, step, "stopping at step boundary");
                    ctx.state_tx.send_replace(ScanState::Stopping);
                    break;
                }
                let target = traj.position_at(step).to_vec();
                let Some(step_data) = acquire_step(
                    ctx,
                    &event_tx,
                    &mut event_rx,
                    &mut generation,
                    &mut accumulator,
                    &target,
                )
                .await?
                else {
                    info!(scan_id = %ctx.scan_id, step, "stop observed mid-step, step discarded");
                    ctx.state_tx.send_replace(ScanState::Stopping);
                    break;
                };

                let nav_index = traj.nav_index_at(step).to_vec();
                let mut containers = Vec::with_capacity(step_data.len());
                for det in step_data {
                    containers.push(build_container(det, None)?);
                }
                let degraded = persist(ctx, &containers, &nav_index).await;

                *completed += 1;
                *last_completed = Some((step, nav_index.clone()));
                let _ = ctx.status_tx.send(ScanStatus {
                    scan_id: ctx.scan_id,
                    step_index: step,
                    n_steps,
                    nav_index,
                    containers,
                    persistence_degraded: degraded,
                    error: None,
                    last_completed: Some(step),
                });
                ctx.state_tx.send_replace(ScanState::Advancing);
            }
        }
        Plan::Adaptive(mut scan) => {
            let n_steps = scan.stop_rule().max_points;
            let mut step = 0usize;
            while let Some(target) = scan.next_position() {
                if *ctx.stop_rx.borrow() {
                    info!(scan_id = %ctx.scan_id, step, "stopping at step boundary");
                    ctx.state_tx.send_replace(ScanState::Stopping);
                    break;
                }
                let Some(step_data) = acquire_step(
                    ctx,
                    &event_tx,
                    &mut event_rx,
                    &mut generation,
                    &mut accumulator,
                    &target,
                )
                .await?
                else {
                    info!(scan_id = %ctx.scan_id, step, "stop observed mid-step, step discarded");
                    ctx.state_tx.send_replace(ScanState::Stopping);
                    break;
                };

                // Feedback: the mean of the first detector's first channel.
                let measured = step_data
                    .first()
                    .and_then(|det| det.arrays.first())
                    .and_then(|arr| arr.mean())
                    .ok_or_else(|| {
                        ScanError::Internal("Adaptive scan got no data to learn from".into())
                    })?;
                scan.tell(&target, measured)?;

                let spread_axes: Vec<Axis> = ctx
                    .actuators
                    .iter()
                    .enumerate()
                    .map(|(i, actuator)| {
                        Axis::explicit(actuator.id(), "", 0, vec![target[i]])
                            .with_spread_order(i)
                    })
                    .collect();
                let mut containers = Vec::with_capacity(step_data.len());
                for det in step_data {
                    containers.push(build_container(det, Some(spread_axes.clone()))?);
                }
                let nav_index = vec![step];
                let degraded = persist(ctx, &containers, &nav_index).await;

                *completed += 1;
                *last_completed = Some((step, nav_index.clone()));
                let _ = ctx.status_tx.send(ScanStatus {
                    scan_id: ctx.scan_id,
                    step_index: step,
                    n_steps,
                    nav_index,
                    containers,
                    persistence_degraded: degraded,
                    error: None,
                    last_completed: Some(step),
                });
                ctx.state_tx.send_replace(ScanState::Advancing);
                step += 1;
            }
        }
    }
    Ok(*completed)
}

/// Run `n_average` move+grab rounds at one target and return the finalized
/// per-detector means.
///
/// The stop flag is consulted at every state boundary within the step. When
/// it is set, the in-flight barrier is drained first, then `Ok(None)` is
/// returned and the caller discards the step: nothing partial is averaged,
/// persisted or emitted.
async fn acquire_step(
    ctx: &ScanContext,
    event_tx: &mpsc::UnboundedSender<StepEvent>,
    event_rx: &mut mpsc::UnboundedReceiver<StepEvent>,
    generation: &mut u64,
    accumulator: &mut AveragingAccumulator,
    target: &[f64],
) -> ScanResult<Option<Vec<DetectorData>>> {
    accumulator.clear();
    let mut labels: HashMap<String, Vec<String>> = HashMap::new();

    for _ in 0..ctx.n_average {
        if *ctx.stop_rx.borrow() {
            return Ok(None);
        }
        ctx.state_tx.send_replace(ScanState::MovingActuators);
        *generation += 1;
        for (actuator, &position) in ctx.actuators.iter().zip(target) {
            let actuator = Arc::clone(actuator);
            let tx = event_tx.clone();
            let generation = *generation;
            tokio::spawn(async move {
                let result = actuator.move_abs(position).await.map_err(|e| e.to_string());
                let _ = tx.send(StepEvent::MoveDone {
                    actuator: actuator.id().to_string(),
                    generation,
                    result,
                });
            });
        }
        await_moves(
            event_rx,
            ctx.actuators.iter().map(|a| a.id().to_string()).collect(),
            ctx.config.timing.move_timeout,
            *generation,
        )
        .await?;

        if *ctx.stop_rx.borrow() {
            return Ok(None);
        }
        if ctx.config.timing.wait_between_ms > 0 {
            tokio::time::sleep(Duration::from_millis(ctx.config.timing.wait_between_ms)).await;
        }

        ctx.state_tx.send_replace(ScanState::WaitingDetectors);
        *generation += 1;
        for detector in &ctx.detectors {
            let detector = Arc::clone(detector);
            let tx = event_tx.clone();
            let generation = *generation;
            let n_average = ctx.n_average;
            tokio::spawn(async move {
                let result = detector.grab(n_average).await.map_err(|e| e.to_string());
                let _ = tx.send(StepEvent::DataReady {
                    detector: detector.id().to_string(),
                    generation,
                    result,
                });
            });
        }
        let grabs = await_grabs(
            event_rx,
            ctx.detectors.iter().map(|d| d.id().to_string()).collect(),
            ctx.config.timing.grab_timeout,
            *generation,
        )
        .await?;

        if *ctx.stop_rx.borrow() {
            return Ok(None);
        }
        ctx.state_tx.send_replace(ScanState::Averaging);
        for (detector, container) in grabs {
            labels.insert(detector.clone(), container.labels().to_vec());
            for (channel, arr) in container.data().iter().enumerate() {
                accumulator.add(ChannelKey::new(detector.clone(), channel), arr)?;
            }
        }
    }

    let means = accumulator.finalize();
    let mut out = Vec::with_capacity(ctx.detectors.len());
    for detector in &ctx.detectors {
        let name = detector.id().to_string();
        let mut channels: Vec<(usize, ArrayD<f64>)> = means
            .iter()
            .filter(|(key, _)| key.detector == name)
            .map(|(key, mean)| (key.channel, mean.clone()))
            .collect();
        channels.sort_by_key(|(channel, _)| *channel);
        out.push(DetectorData {
            labels: labels.remove(&name).unwrap_or_default(),
            arrays: channels.into_iter().map(|(_, arr)| arr).collect(),
            name,
        });
    }
    Ok(Some(out))
}

/// Join barrier over the expected set of move-done notifications.
async fn await_moves(
    event_rx: &mut mpsc::UnboundedReceiver<StepEvent>,
    expected: HashSet<String>,
    timeout: Duration,
    generation: u64,
) -> ScanResult<()> {
    let deadline = Instant::now() + timeout;
    let mut missing = expected;
    while !missing.is_empty() {
        match timeout_at(deadline, event_rx.recv()).await {
            Ok(Some(StepEvent::MoveDone {
                actuator,
                generation: tagged,
                result,
            })) => {
                if tagged != generation {
                    debug!(%actuator, tagged, generation, "discarding stale move-done");
                    continue;
                }
                result.map_err(|message| ScanError::Hardware {
                    module: actuator.clone(),
                    message,
                })?;
                missing.remove(&actuator);
            }
            Ok(Some(StepEvent::DataReady { detector, .. })) => {
                debug!(%detector, "discarding data-ready outside a grab barrier");
            }
            Ok(None) => {
                return Err(ScanError::Internal("step event channel closed".into()));
            }
            Err(_) => {
                let mut actuators: Vec<String> = missing.into_iter().collect();
                actuators.sort();
                return Err(ScanError::ActuatorTimeout { actuators, timeout });
            }
        }
    }
    Ok(())
}

/// Join barrier over the expected set of data-ready notifications.
async fn await_grabs(
    event_rx: &mut mpsc::UnboundedReceiver<StepEvent>,
    expected: HashSet<String>,
    timeout: Duration,
    generation: u64,
) -> ScanResult<Vec<(String, DataContainer)>> {
    let deadline = Instant::now() + timeout;
    let mut missing = expected;
    let mut grabs = Vec::with_capacity(missing.len());
    while !missing.is_empty() {
        match timeout_at(deadline, event_rx.recv()).await {
            Ok(Some(StepEvent::DataReady {
                detector,
                generation: tagged,
                result,
            })) => {
                if tagged != generation {
                    debug!(%detector, tagged, generation, "discarding stale data-ready");
                    continue;
                }
                let container = result.map_err(|message| ScanError::Hardware {
                    module: detector.clone(),
                    message,
                })?;
                missing.remove(&detector);
                grabs.push((detector, container));
            }
            Ok(Some(StepEvent::MoveDone { actuator, .. })) => {
                debug!(%actuator, "discarding move-done outside a move barrier");
            }
            Ok(None) => {
                return Err(ScanError::Internal("step event channel closed".into()));
            }
            Err(_) => {
                let mut detectors: Vec<String> = missing.into_iter().collect();
                detectors.sort();
                return Err(ScanError::DetectorTimeout { detectors, timeout });
            }
        }
    }
    Ok(grabs)
}

/// Build the emitted container for one detector. For adaptive (spread)
/// steps the channels grow a length-1 navigation dimension carrying the
/// literal coordinates.
fn build_container(det: DetectorData, spread_axes: Option<Vec<Axis>>) -> ScanResult<DataContainer> {
    let DetectorData {
        name,
        labels,
        arrays,
    } = det;
    let (arrays, n_channels) = match &spread_axes {
        Some(_) => {
            let expanded: Vec<ArrayD<f64>> = arrays
                .into_iter()
                .map(|arr| arr.insert_axis(NdAxis(0)))
                .collect();
            let n = expanded.len();
            (expanded, n)
        }
        None => {
            let n = arrays.len();
            (arrays, n)
        }
    };
    let mut container = DataContainer::new(name, arrays)?;
    if labels.len() == n_channels {
        container = container.with_labels(labels)?;
    }
    if let Some(axes) = spread_axes {
        container = container
            .with_axes(axes)?
            .with_nav_indexes(vec![0])?
            .with_distribution(Distribution::Spread)?;
    }
    Ok(container)
}

/// Append every container of a step; persistence failures are logged and
/// flagged but never abort the scan.
async fn persist(ctx: &ScanContext, containers: &[DataContainer], nav_index: &[usize]) -> bool {
    let mut degraded = false;
    for container in containers {
        if let Err(e) = ctx.sink.append(container, nav_index).await {
            warn!(
                scan_id = %ctx.scan_id,
                container = %container.name,
                ?nav_index,
                error = %e,
                "persistence append failed"
            );
            degraded = true;
        }
    }
    degraded
}
