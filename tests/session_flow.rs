use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mindstate::classifier::MemoryModelStore;
use mindstate::sensor::CommandLog;
use mindstate::{
    Config, DocumentStore, FileModelStore, JsonFileStore, Label, MemoryStore, Mode, ModelStore,
    ReplaySensor, SessionError, SessionOrchestrator, SimulatedSensor,
};

const PER_LABEL: u32 = 20;

fn simulated_windows(label: Label, count: u32, seed: u64) -> Vec<Vec<i32>> {
    let mut sim = SimulatedSensor::new(label, seed);
    (0..count).map(|_| sim.generate_window()).collect()
}

fn wait_for_idle(orch: &SessionOrchestrator) {
    for _ in 0..500 {
        if orch.status().unwrap().mode.is_idle() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("session never returned to idle");
}

/// Collects both labels through the orchestrator, then trains.
fn collect_and_train(orch: &SessionOrchestrator, user: &str) {
    for label in [Label::Relaxing, Label::Focused] {
        let flags = orch.collect_for(user, label, PER_LABEL).unwrap();
        assert!(flags.collected(label));
    }
    let report = orch.train_model(user).unwrap();
    assert_eq!(report.n_train + report.n_test, 2 * PER_LABEL as usize);
    assert_eq!(report.n_test, 8);
    assert!(report.evaluation.accuracy >= 0.75, "{report}");
}

fn replay_for_full_session(prediction_windows: Vec<Vec<i32>>) -> (ReplaySensor, CommandLog) {
    let mut windows = simulated_windows(Label::Relaxing, PER_LABEL, 1);
    windows.extend(simulated_windows(Label::Focused, PER_LABEL, 2));
    windows.extend(prediction_windows);
    let sensor = ReplaySensor::new(windows);
    let log = sensor.command_log();
    (sensor, log)
}

#[test]
fn collect_train_and_predict_end_to_end() {
    let (sensor, log) = replay_for_full_session(simulated_windows(Label::Focused, 5, 3));
    let documents = Arc::new(MemoryStore::new());
    let models = Arc::new(MemoryModelStore::new());
    let orch = SessionOrchestrator::new(
        Config::default(),
        Box::new(sensor),
        documents.clone(),
        models.clone(),
    )
    .unwrap();

    collect_and_train(&orch, "ada");
    assert_eq!(documents.example_count(), 2 * PER_LABEL as usize);
    assert!(orch.model_status("ada").unwrap());
    assert!(models.exists("model_ada"));
    assert!(matches!(
        orch.train_model("ada"),
        Err(SessionError::AlreadyTrained(_))
    ));

    assert!(!orch.is_model_loaded("ada"));
    orch.load_model("ada").unwrap();
    assert!(orch.is_model_loaded("ada"));
    let rx = orch.start_prediction("ada").unwrap();
    let smoothed = rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(smoothed.votes.len(), 5);
    assert_eq!(smoothed.label, Label::Focused);

    // The replay queue is now empty; the worker ends on its own.
    assert!(rx.recv_timeout(Duration::from_secs(30)).is_err());
    wait_for_idle(&orch);
    assert_eq!(log.count("connect"), 3);
    assert_eq!(log.count("stop_reading"), 3);
    assert_eq!(log.count("disconnect"), 3);
}

#[test]
fn file_backed_stores_survive_a_restart() {
    let root = std::env::temp_dir().join(format!("mindstate-flow-{}", rand::random::<u64>()));
    let mut config = Config::default();
    config.storage.data_dir = root.join("data");
    config.storage.model_dir = root.join("models");

    let open = |sensor: ReplaySensor, config: &Config| {
        SessionOrchestrator::new(
            config.clone(),
            Box::new(sensor),
            Arc::new(JsonFileStore::open(&config.storage.data_dir).unwrap()),
            Arc::new(FileModelStore::new(&config.storage.model_dir)),
        )
        .unwrap()
    };

    let (sensor, _) = replay_for_full_session(Vec::new());
    let first = open(sensor, &config);
    collect_and_train(&first, "bob@example.com");
    drop(first);

    let documents = JsonFileStore::open(&config.storage.data_dir).unwrap();
    assert_eq!(
        documents.examples_for("bob@example.com").unwrap().len(),
        2 * PER_LABEL as usize
    );

    let relaxing = simulated_windows(Label::Relaxing, 1, 9);
    let second = open(ReplaySensor::new(relaxing).repeating(), &config);
    assert!(second.model_status("bob@example.com").unwrap());
    second.load_model("bob@example.com").unwrap();
    let rx = second.start_prediction("bob@example.com").unwrap();
    let smoothed = rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(smoothed.label, Label::Relaxing);
    second.stop_prediction().unwrap();
    assert_eq!(second.status().unwrap().mode, Mode::Idle);

    std::fs::remove_dir_all(root).ok();
}

#[test]
fn dropping_the_receiver_ends_prediction() {
    let (sensor, log) = replay_for_full_session(simulated_windows(Label::Focused, 50, 5));
    let documents = Arc::new(MemoryStore::new());
    let orch = SessionOrchestrator::new(
        Config::default(),
        Box::new(sensor),
        documents.clone(),
        Arc::new(MemoryModelStore::new()),
    )
    .unwrap();
    assert!(matches!(
        orch.start_prediction("cy"),
        Err(SessionError::ModelNotLoaded(_))
    ));
    assert_eq!(log.count("connect"), 0);

    collect_and_train(&orch, "cy");
    assert!(documents.user_flags("cy").unwrap().unwrap().model_trained);
    orch.load_model("cy").unwrap();
    let rx = orch.start_prediction("cy").unwrap();
    rx.recv_timeout(Duration::from_secs(30)).unwrap();
    drop(rx);

    // The next batch finds no consumer and the worker releases the sensor.
    wait_for_idle(&orch);
    assert_eq!(log.count("disconnect"), 3);
    assert!(matches!(
        orch.stop_prediction(),
        Err(SessionError::NotActive("prediction"))
    ));
}

#[test]
fn a_refused_connection_returns_to_idle() {
    let sensor = ReplaySensor::new(Vec::<Vec<i32>>::new()).refusing_connect();
    let log = sensor.command_log();
    let orch = SessionOrchestrator::new(
        Config::default(),
        Box::new(sensor),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryModelStore::new()),
    )
    .unwrap();
    orch.start_collection("dee", Label::Focused, None).unwrap();
    wait_for_idle(&orch);
    assert_eq!(log.count("connect"), 1);
    assert_eq!(log.count(mindstate::sensor::START_COMMAND), 0);
    // A fresh start is allowed once the failed worker is reaped.
    orch.start_collection("dee", Label::Focused, Some(0)).unwrap();
    wait_for_idle(&orch);
}
