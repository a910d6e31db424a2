//! Scenario tests for the scan coordinator against mock hardware.

use ndscan::config::EngineConfig;
use ndscan::engine::{ScanCoordinator, ScanRequest, ScanState, ScanStatus};
use ndscan::error::ScanError;
use ndscan::hardware::{
    Actuator, Detector, MemorySink, MockActuator, MockDetector, PersistenceSink,
};
use ndscan::scan::{AdaptiveStop, ScanSpec, ScanSubtype};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Rig {
    coordinator: ScanCoordinator,
    stage: Arc<MockActuator>,
    sink: Arc<MemorySink>,
}

/// One stage, one scalar detector reading `f(position)`.
fn rig(config: EngineConfig, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Rig {
    let stage = Arc::new(MockActuator::new("stage", Duration::from_millis(1)));
    let detector = Arc::new(MockDetector::scalar(
        "photodiode",
        stage.position_handle(),
        f,
    ));
    let sink = Arc::new(MemorySink::new());
    let coordinator = ScanCoordinator::new(
        config,
        vec![Arc::clone(&stage) as Arc<dyn Actuator>],
        vec![detector as Arc<dyn Detector>],
        Arc::clone(&sink) as Arc<dyn PersistenceSink>,
    );
    Rig {
        coordinator,
        stage,
        sink,
    }
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timing.move_timeout = Duration::from_secs(2);
    config.timing.grab_timeout = Duration::from_secs(2);
    config
}

async fn collect(rx: &mut broadcast::Receiver<ScanStatus>, n: usize) -> Vec<ScanStatus> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(rx.recv().await.unwrap());
    }
    out
}

#[tokio::test]
async fn end_to_end_line_scan_emits_squares_in_order() {
    let rig = rig(fast_config(), |x| x * x);
    let mut status_rx = rig.coordinator.subscribe_status();

    rig.coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 4.0, 1.0)))
        .await
        .unwrap();
    assert_eq!(rig.coordinator.wait().await.unwrap(), 5);

    let statuses = collect(&mut status_rx, 5).await;
    let values: Vec<f64> = statuses
        .iter()
        .map(|s| s.containers[0].data()[0][[0]])
        .collect();
    assert_eq!(values, vec![0.0, 1.0, 4.0, 9.0, 16.0]);
    for (i, status) in statuses.iter().enumerate() {
        assert_eq!(status.step_index, i);
        assert_eq!(status.n_steps, 5);
        assert_eq!(status.nav_index, vec![i]);
        assert!(status.error.is_none());
        assert!(!status.persistence_degraded);
    }

    // every step persisted under its navigation index
    assert_eq!(rig.sink.len().await, 5);
    assert_eq!(rig.sink.get(&[3]).await.unwrap().data()[0][[0]], 9.0);
    assert_eq!(rig.coordinator.current_state(), ScanState::Idle);
}

#[tokio::test]
async fn out_of_order_detector_replies_do_not_reorder_steps() {
    let stage = Arc::new(MockActuator::new("stage", Duration::ZERO));
    let fast = Arc::new(MockDetector::scalar("fast", stage.position_handle(), |x| x));
    let slow = Arc::new(
        MockDetector::scalar("slow", stage.position_handle(), |x| -x)
            .with_latency(Duration::from_millis(2))
            .with_jitter(Duration::from_millis(8)),
    );
    let sink = Arc::new(MemorySink::new());
    let coordinator = ScanCoordinator::new(
        fast_config(),
        vec![Arc::clone(&stage) as Arc<dyn Actuator>],
        vec![fast as Arc<dyn Detector>, slow as Arc<dyn Detector>],
        Arc::clone(&sink) as Arc<dyn PersistenceSink>,
    );

    let mut status_rx = coordinator.subscribe_status();
    coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 9.0, 1.0)))
        .await
        .unwrap();
    assert_eq!(coordinator.wait().await.unwrap(), 10);

    let statuses = collect(&mut status_rx, 10).await;
    for (i, status) in statuses.iter().enumerate() {
        assert_eq!(status.step_index, i);
        assert_eq!(status.containers.len(), 2);
        // both detectors saw the same settled position
        assert_eq!(status.containers[0].name, "fast");
        assert_eq!(
            status.containers[0].data()[0][[0]],
            -status.containers[1].data()[0][[0]]
        );
    }
}

#[tokio::test]
async fn stalled_actuator_times_out_then_restarts_cleanly() {
    let mut config = fast_config();
    config.timing.move_timeout = Duration::from_millis(50);
    let rig = rig(config, |x| x);
    let mut status_rx = rig.coordinator.subscribe_status();

    rig.stage.stall();
    rig.coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 4.0, 1.0)))
        .await
        .unwrap();
    let err = rig.coordinator.wait().await.unwrap_err();
    match err {
        ScanError::ActuatorTimeout { actuators, .. } => {
            assert_eq!(actuators, vec!["stage".to_string()])
        }
        other => panic!("expected ActuatorTimeout, got {other}"),
    }

    // exactly one terminal status, carrying the error; nothing completed,
    // so there is no step to resume from
    let terminal = status_rx.recv().await.unwrap();
    assert!(terminal.error.is_some());
    assert!(terminal.containers.is_empty());
    assert!(terminal.last_completed.is_none());
    assert!(terminal.nav_index.is_empty());

    // the coordinator is idle again and a new scan succeeds
    assert_eq!(rig.coordinator.current_state(), ScanState::Idle);
    rig.stage.unstall();
    rig.coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 2.0, 1.0)))
        .await
        .unwrap();
    assert_eq!(rig.coordinator.wait().await.unwrap(), 3);
}

#[tokio::test]
async fn slow_detector_times_out() {
    let stage = Arc::new(MockActuator::new("stage", Duration::ZERO));
    let detector = Arc::new(
        MockDetector::scalar("slow", stage.position_handle(), |x| x)
            .with_latency(Duration::from_millis(200)),
    );
    let sink = Arc::new(MemorySink::new());
    let mut config = fast_config();
    config.timing.grab_timeout = Duration::from_millis(50);
    let coordinator = ScanCoordinator::new(
        config,
        vec![stage as Arc<dyn Actuator>],
        vec![detector as Arc<dyn Detector>],
        sink as Arc<dyn PersistenceSink>,
    );

    coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 2.0, 1.0)))
        .await
        .unwrap();
    let err = coordinator.wait().await.unwrap_err();
    assert!(matches!(err, ScanError::DetectorTimeout { detectors, .. }
        if detectors == vec!["slow".to_string()]));
    assert_eq!(coordinator.current_state(), ScanState::Idle);
}

#[tokio::test]
async fn stop_request_unwinds_at_a_step_boundary() {
    let stage = Arc::new(MockActuator::new("stage", Duration::ZERO));
    let detector = Arc::new(
        MockDetector::scalar("pd", stage.position_handle(), |x| x)
            .with_latency(Duration::from_millis(10)),
    );
    let sink = Arc::new(MemorySink::new());
    let coordinator = ScanCoordinator::new(
        fast_config(),
        vec![stage as Arc<dyn Actuator>],
        vec![detector as Arc<dyn Detector>],
        Arc::clone(&sink) as Arc<dyn PersistenceSink>,
    );

    coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 99.0, 1.0)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    coordinator.stop();
    let completed = coordinator.wait().await.unwrap();
    assert!(completed > 0, "some steps should have completed");
    assert!(completed < 100, "the stop should cut the scan short");
    // only fully completed steps reach the sink
    assert_eq!(sink.len().await, completed);
    assert_eq!(coordinator.current_state(), ScanState::Idle);
}

#[tokio::test]
async fn stop_mid_acquisition_discards_the_step_in_flight() {
    let stage = Arc::new(MockActuator::new("stage", Duration::ZERO));
    let detector = Arc::new(
        MockDetector::scalar("pd", stage.position_handle(), |x| x)
            .with_latency(Duration::from_millis(100)),
    );
    let sink = Arc::new(MemorySink::new());
    let coordinator = ScanCoordinator::new(
        fast_config(),
        vec![stage as Arc<dyn Actuator>],
        vec![detector as Arc<dyn Detector>],
        Arc::clone(&sink) as Arc<dyn PersistenceSink>,
    );

    let mut status_rx = coordinator.subscribe_status();
    coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 9.0, 1.0)))
        .await
        .unwrap();
    // step 0's grab is in flight when the stop arrives
    tokio::time::sleep(Duration::from_millis(30)).await;
    coordinator.stop();

    assert_eq!(coordinator.wait().await.unwrap(), 0);
    assert!(sink.is_empty().await, "the discarded step must not be persisted");
    assert!(status_rx.try_recv().is_err(), "the discarded step must not be emitted");
    assert_eq!(coordinator.current_state(), ScanState::Idle);
}

#[tokio::test]
async fn terminal_status_names_the_last_completed_step() {
    let stage = Arc::new(MockActuator::new("stage", Duration::ZERO));
    let detector = Arc::new(
        MockDetector::scalar("pd", stage.position_handle(), |x| x)
            .with_latency(Duration::from_millis(20)),
    );
    let sink = Arc::new(MemorySink::new());
    let mut config = fast_config();
    config.timing.move_timeout = Duration::from_millis(100);
    let coordinator = ScanCoordinator::new(
        config,
        vec![Arc::clone(&stage) as Arc<dyn Actuator>],
        vec![detector as Arc<dyn Detector>],
        Arc::clone(&sink) as Arc<dyn PersistenceSink>,
    );

    let mut status_rx = coordinator.subscribe_status();
    coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 99.0, 1.0)))
        .await
        .unwrap();
    // let a couple of steps finish, then make the next move hang
    tokio::time::sleep(Duration::from_millis(50)).await;
    stage.stall();
    let err = coordinator.wait().await.unwrap_err();
    assert!(matches!(err, ScanError::ActuatorTimeout { .. }));

    let mut terminal = status_rx.recv().await.unwrap();
    while terminal.error.is_none() {
        terminal = status_rx.recv().await.unwrap();
    }
    let last = terminal.last_completed.expect("steps completed before the stall");
    assert_eq!(terminal.step_index, last);
    assert_eq!(terminal.nav_index, vec![last]);
    // resuming after `last` would pick up exactly where the sink ends
    assert_eq!(sink.len().await, last + 1);
}

#[tokio::test]
async fn second_start_while_running_is_busy() {
    let rig = rig(fast_config(), |x| x);
    rig.coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 20.0, 1.0)))
        .await
        .unwrap();
    let err = rig
        .coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 1.0, 1.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Busy));
    rig.coordinator.wait().await.unwrap();
}

#[tokio::test]
async fn software_averaging_folds_repeated_grabs() {
    // detector ignores the position and returns 1, 2, 3, 4, ... so the mean
    // over 4 repeats at the first step is 2.5
    let counter = Arc::new(AtomicUsize::new(0));
    let stage = Arc::new(MockActuator::new("stage", Duration::ZERO));
    let c = Arc::clone(&counter);
    let detector = Arc::new(MockDetector::scalar("pd", stage.position_handle(), move |_| {
        (c.fetch_add(1, Ordering::SeqCst) + 1) as f64
    }));
    let sink = Arc::new(MemorySink::new());
    let coordinator = ScanCoordinator::new(
        fast_config(),
        vec![stage as Arc<dyn Actuator>],
        vec![detector as Arc<dyn Detector>],
        Arc::clone(&sink) as Arc<dyn PersistenceSink>,
    );

    let mut status_rx = coordinator.subscribe_status();
    coordinator
        .start(
            ScanRequest::new(ScanSpec::linear_1d(0.0, 1.0, 1.0)).with_averaging(4),
        )
        .await
        .unwrap();
    assert_eq!(coordinator.wait().await.unwrap(), 2);

    let statuses = collect(&mut status_rx, 2).await;
    // step 0 averages samples 1..=4, step 1 averages 5..=8
    assert_eq!(statuses[0].containers[0].data()[0][[0]], 2.5);
    assert_eq!(statuses[1].containers[0].data()[0][[0]], 6.5);
}

#[tokio::test]
async fn persistence_failures_degrade_but_do_not_abort() {
    let rig = rig(fast_config(), |x| x);
    rig.sink.set_failing(true).await;

    let mut status_rx = rig.coordinator.subscribe_status();
    rig.coordinator
        .start(ScanRequest::new(ScanSpec::linear_1d(0.0, 4.0, 1.0)))
        .await
        .unwrap();
    assert_eq!(rig.coordinator.wait().await.unwrap(), 5);

    let statuses = collect(&mut status_rx, 5).await;
    assert!(statuses.iter().all(|s| s.persistence_degraded));
    assert!(statuses.iter().all(|s| s.error.is_none()));
    assert!(rig.sink.is_empty().await);
}

#[tokio::test]
async fn adaptive_scan_emits_spread_containers() {
    let rig = rig(fast_config(), |x| x);
    let mut status_rx = rig.coordinator.subscribe_status();

    let spec = ScanSpec::linear_1d(0.0, 1.0, 0.0).with_subtype(ScanSubtype::Adaptive);
    rig.coordinator
        .start(ScanRequest::new(spec).with_adaptive(AdaptiveStop {
            max_points: 5,
            loss_goal: None,
        }))
        .await
        .unwrap();
    assert_eq!(rig.coordinator.wait().await.unwrap(), 5);

    let statuses = collect(&mut status_rx, 5).await;
    let positions: Vec<f64> = statuses
        .iter()
        .map(|s| s.containers[0].axes()[0].data()[0])
        .collect();
    assert_eq!(positions[0], 0.0);
    assert_eq!(positions[1], 1.0);
    assert_eq!(positions[2], 0.5);

    for status in &statuses {
        let container = &status.containers[0];
        assert_eq!(
            container.distribution,
            ndscan::data::Distribution::Spread
        );
        assert_eq!(container.nav_indexes(), &[0]);
        // measured value follows the spread coordinate
        assert_eq!(
            container.data()[0][[0, 0]],
            container.axes()[0].data()[0]
        );
    }
    assert_eq!(rig.sink.len().await, 5);
}

#[tokio::test]
async fn mismatched_axis_count_fails_before_moving() {
    let rig = rig(fast_config(), |x| x);
    let err = rig
        .coordinator
        .start(ScanRequest::new(ScanSpec::linear_2d(
            [0.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
        )))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::TrajectoryConfig(_)));
    assert_eq!(rig.coordinator.current_state(), ScanState::Idle);
}
