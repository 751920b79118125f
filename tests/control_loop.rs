use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use plate_gate::error::{CaptureError, EchoPhase, LookupError, SensorError};
use plate_gate::hw::mock::{LineLog, MockServo};
use plate_gate::hw::ServoLine;
use plate_gate::state::{
    STATUS_CAPTURE_FAILED, STATUS_GATE_FAILED, STATUS_LOOKUP_FAILED, STATUS_NO_VEHICLE, STATUS_SENSOR_ERROR,
    STATUS_STOPPED,
};
use plate_gate::{
    Camera, Capture, ControlLoop, CycleOutcome, DetectionState, DistanceSensor, FixtureDatabase,
    FixtureRecognizer, GateStatus, Hardware, LoopSettings, Pacing, PlateDatabase, PlateFixtures,
    PlateRecord, ServoGate, StateStore,
};

const PLACEHOLDER: &str = "/images/NoVehicleDetected.jpg";

/// Sensor that reads a fixed distance and counts its readings.
struct FixedSensor {
    distance_m: f64,
    reads: Arc<AtomicUsize>,
}

impl DistanceSensor for FixedSensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.distance_m)
    }
}

/// Sensor that replays readings in order, then reports nothing nearby.
struct SequenceSensor(Vec<f64>);

impl DistanceSensor for SequenceSensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        if self.0.is_empty() {
            return Ok(10.0);
        }
        Ok(self.0.remove(0))
    }
}

struct TimeoutSensor;

impl DistanceSensor for TimeoutSensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        Err(SensorError::Timeout {
            phase: EchoPhase::Rising,
            waited: Duration::from_secs(1),
        })
    }
}

/// Camera that always "captures" the same file.
struct FixedCamera {
    image: Option<String>,
    captures: Arc<AtomicUsize>,
}

impl Camera for FixedCamera {
    fn capture_image(&mut self) -> Result<Capture, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        match &self.image {
            Some(image) => Ok(Capture {
                image_path: image.clone(),
                plate_hint: None,
            }),
            None => Err(CaptureError::Device("lens cap on".to_string())),
        }
    }
}

struct OfflineDatabase;

impl PlateDatabase for OfflineDatabase {
    fn is_known(&mut self, _plate: &str) -> Result<bool, LookupError> {
        Err(LookupError::Unavailable("network down".to_string()))
    }
}

fn fixtures() -> Arc<PlateFixtures> {
    Arc::new(PlateFixtures::new(
        vec![
            PlateRecord::new("car_X.jpg", "ABC-123"),
            PlateRecord::new("car_Y.jpg", "ZZZ-999"),
        ],
        vec!["ABC-123".to_string()],
    ))
}

struct Rig {
    control: ControlLoop,
    store: StateStore,
    servo: LineLog,
    reads: Arc<AtomicUsize>,
    captures: Arc<AtomicUsize>,
}

fn rig_with(
    sensor: Option<Box<dyn DistanceSensor>>,
    distance_m: f64,
    image: Option<&str>,
    database: Option<Box<dyn PlateDatabase>>,
) -> Rig {
    rig_with_servo(sensor, distance_m, image, database, MockServo::new())
}

fn rig_with_servo(
    sensor: Option<Box<dyn DistanceSensor>>,
    distance_m: f64,
    image: Option<&str>,
    database: Option<Box<dyn PlateDatabase>>,
    servo: MockServo,
) -> Rig {
    let fixtures = fixtures();
    let reads = Arc::new(AtomicUsize::new(0));
    let captures = Arc::new(AtomicUsize::new(0));
    let sensor = sensor.unwrap_or_else(|| {
        Box::new(FixedSensor {
            distance_m,
            reads: reads.clone(),
        })
    });
    let camera = FixedCamera {
        image: image.map(str::to_string),
        captures: captures.clone(),
    };
    let servo_log = servo.log();
    let hardware = Hardware::new(
        sensor,
        Box::new(camera),
        ServoGate::new(Box::new(servo), Duration::ZERO),
    );
    let database = database
        .unwrap_or_else(|| Box::new(FixtureDatabase::new(fixtures.clone(), Duration::ZERO)));

    let store = StateStore::new(DetectionState::idle(PLACEHOLDER));
    let control = ControlLoop::new(
        store.clone(),
        hardware,
        Box::new(FixtureRecognizer::new(fixtures, Duration::ZERO)),
        database,
        LoopSettings {
            threshold_m: 0.2,
            placeholder_image: PLACEHOLDER.to_string(),
            pacing: Pacing::immediate(),
        },
    );
    Rig {
        control,
        store,
        servo: servo_log,
        reads,
        captures,
    }
}

fn rig(distance_m: f64, image: &str) -> Rig {
    rig_with(None, distance_m, Some(image), None)
}

#[test]
fn reading_beyond_threshold_is_no_vehicle() {
    let mut rig = rig(1.0, "car_X.jpg");

    let outcome = rig.control.run_once();

    assert_eq!(outcome, CycleOutcome::NoVehicle { distance_m: 1.0 });
    assert_eq!(rig.store.read().status, STATUS_NO_VEHICLE);
    assert_eq!(rig.captures.load(Ordering::SeqCst), 0);
    assert_eq!(rig.servo.moves(), 0);
}

#[test]
fn reading_at_threshold_counts_as_vehicle() {
    let mut rig = rig(0.2, "car_X.jpg");

    let outcome = rig.control.run_once();

    assert_eq!(
        outcome,
        CycleOutcome::GateCycled {
            plate: "ABC-123".to_string()
        }
    );
    assert_eq!(rig.captures.load(Ordering::SeqCst), 1);
}

#[test]
fn sensor_timeout_reports_sensor_error() {
    let mut rig = rig_with(Some(Box::new(TimeoutSensor)), 0.0, Some("car_X.jpg"), None);

    let outcome = rig.control.run_once();

    assert_eq!(outcome, CycleOutcome::SensorFailed);
    let state = rig.store.read();
    assert_eq!(state.status, STATUS_SENSOR_ERROR);
    assert_eq!(state.gate_status, GateStatus::Closed);
    assert_eq!(rig.captures.load(Ordering::SeqCst), 0);
}

#[test]
fn stopped_detection_touches_no_hardware() {
    let mut rig = rig(0.1, "car_X.jpg");
    rig.store.set_running(false);

    for _ in 0..3 {
        assert_eq!(rig.control.run_once(), CycleOutcome::Stopped);
    }
    assert_eq!(rig.store.read().status, STATUS_STOPPED);
    assert_eq!(rig.reads.load(Ordering::SeqCst), 0);
    assert_eq!(rig.captures.load(Ordering::SeqCst), 0);
    assert!(rig.servo.duties().is_empty());

    rig.store.set_running(true);
    rig.control.run_once();
    assert_eq!(rig.reads.load(Ordering::SeqCst), 1);
}

#[test]
fn known_plate_opens_holds_and_closes() {
    let mut rig = rig(0.1, "car_X.jpg");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    rig.store.observe(move |state| {
        let mut seen = sink.lock().unwrap();
        if seen.last() != Some(&state.gate_status) {
            seen.push(state.gate_status);
        }
    });

    let outcome = rig.control.run_once();

    assert_eq!(
        outcome,
        CycleOutcome::GateCycled {
            plate: "ABC-123".to_string()
        }
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            GateStatus::Closed,
            GateStatus::Opening,
            GateStatus::Opened,
            GateStatus::Closing,
            GateStatus::Closed,
        ]
    );
    assert_eq!(rig.servo.duties(), vec![7.0, 0.0, 2.0, 0.0]);

    let state = rig.store.read();
    assert_eq!(state.status, "License plate ABC-123: Known");
    assert_eq!(state.image_path, "car_X.jpg");
    assert_eq!(state.license_plate, "ABC-123");
    assert!(state.plate_known);
    assert_eq!(state.gate_status, GateStatus::Closed);
}

#[test]
fn unknown_plate_keeps_gate_shut() {
    let mut rig = rig(0.1, "car_Y.jpg");

    let outcome = rig.control.run_once();

    assert_eq!(
        outcome,
        CycleOutcome::UnknownPlate {
            plate: "ZZZ-999".to_string()
        }
    );
    let state = rig.store.read();
    assert_eq!(state.status, "License plate ZZZ-999: Unknown");
    assert_eq!(state.license_plate, "ZZZ-999");
    assert!(!state.plate_known);
    assert_eq!(state.gate_status, GateStatus::ClosedUnknownPlate);
    assert_eq!(rig.servo.moves(), 0);
}

#[test]
fn unmatched_image_is_an_unknown_plate() {
    let mut rig = rig(0.1, "car_Z.jpg");

    let outcome = rig.control.run_once();

    assert_eq!(
        outcome,
        CycleOutcome::UnknownPlate {
            plate: plate_gate::UNKNOWN_PLATE.to_string()
        }
    );
    assert_eq!(rig.servo.moves(), 0);
}

#[test]
fn next_cycle_starts_from_idle_snapshot() {
    let mut rig = rig_with(
        Some(Box::new(SequenceSensor(vec![0.1, 3.0]))),
        0.0,
        Some("car_Y.jpg"),
        None,
    );
    rig.control.run_once();
    assert_eq!(rig.store.read().gate_status, GateStatus::ClosedUnknownPlate);

    rig.control.run_once();

    let state = rig.store.read();
    assert_eq!(state.status, STATUS_NO_VEHICLE);
    assert_eq!(state.image_path, PLACEHOLDER);
    assert!(state.license_plate.is_empty());
    assert!(!state.plate_known);
    assert_eq!(state.gate_status, GateStatus::Closed);
}

#[test]
fn capture_failure_is_reported_and_absorbed() {
    let mut rig = rig_with(None, 0.1, None, None);

    assert_eq!(rig.control.run_once(), CycleOutcome::CaptureFailed);
    let state = rig.store.read();
    assert_eq!(state.status, STATUS_CAPTURE_FAILED);
    assert_eq!(state.image_path, PLACEHOLDER);
    assert_eq!(rig.servo.moves(), 0);

    assert_eq!(rig.control.run_once(), CycleOutcome::CaptureFailed);
    assert_eq!(rig.reads.load(Ordering::SeqCst), 2);
}

#[test]
fn lookup_failure_never_opens_the_gate() {
    let mut rig = rig_with(
        None,
        0.1,
        Some("car_X.jpg"),
        Some(Box::new(OfflineDatabase)),
    );

    assert_eq!(rig.control.run_once(), CycleOutcome::LookupFailed);
    let state = rig.store.read();
    assert_eq!(state.status, STATUS_LOOKUP_FAILED);
    assert_eq!(state.license_plate, "ABC-123");
    assert!(!state.plate_known);
    assert_eq!(rig.servo.moves(), 0);
}

#[test]
fn gate_failure_is_reported_and_next_cycle_recovers() {
    // a servo released underneath the gate rejects every duty write
    let mut servo = MockServo::new();
    servo.release();
    let mut rig = rig_with_servo(
        Some(Box::new(SequenceSensor(vec![0.1, 3.0]))),
        0.0,
        Some("car_X.jpg"),
        None,
        servo,
    );

    let outcome = rig.control.run_once();

    assert_eq!(
        outcome,
        CycleOutcome::GateFailed {
            plate: "ABC-123".to_string()
        }
    );
    let state = rig.store.read();
    assert_eq!(state.status, STATUS_GATE_FAILED);
    assert_eq!(state.license_plate, "ABC-123");
    assert!(state.plate_known);
    assert_eq!(state.gate_status, GateStatus::Closing);
    assert!(rig.servo.duties().is_empty());

    let outcome = rig.control.run_once();

    assert_eq!(outcome, CycleOutcome::NoVehicle { distance_m: 3.0 });
    let state = rig.store.read();
    assert_eq!(state.status, STATUS_NO_VEHICLE);
    assert_eq!(state.gate_status, GateStatus::Closed);
    assert!(state.license_plate.is_empty());
}

#[test]
fn spawned_loop_publishes_consistent_snapshots() {
    let rig = rig(0.1, "car_X.jpg");
    let store = rig.store.clone();
    let servo = rig.servo.clone();
    let handle = rig.control.spawn().unwrap();

    // two full gate cycles, checking every snapshot the reader gets
    let deadline = Instant::now() + Duration::from_secs(5);
    while servo.moves() < 4 && Instant::now() < deadline {
        let state = store.read();
        if !state.gate_status.is_closed() {
            assert!(state.plate_known);
            assert_eq!(state.license_plate, "ABC-123");
        }
    }
    assert!(servo.moves() >= 4);

    let control = handle.stop().unwrap();
    let mut hardware = control.into_hardware();
    assert!(!hardware.is_released());
    hardware.release();
    drop(hardware);

    assert_eq!(servo.releases(), 1);
    assert_eq!(store.read().gate_status, GateStatus::Closed);
}

#[test]
fn dropping_the_handle_releases_hardware() {
    let rig = rig(1.0, "car_X.jpg");
    let servo = rig.servo.clone();
    let reads = rig.reads.clone();
    let handle = rig.control.spawn().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while reads.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    drop(handle);

    assert!(reads.load(Ordering::SeqCst) > 0);
    assert_eq!(servo.releases(), 1);
}
