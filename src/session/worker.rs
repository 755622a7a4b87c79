// src/session/worker.rs
//! Background loops run by the orchestrator. Each worker owns the sensor for
//! its whole lifetime and always leaves it stopped and disconnected.

use log::{debug, error, info, warn};
use std::fmt;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::vote::VoteBuffer;
use crate::classifier::Classifier;
use crate::error::{ClassifierError, SensorError, StoreError, TickError};
use crate::features::FeatureVector;
use crate::pipeline::SignalPipeline;
use crate::sensor::SensorLink;
use crate::store::{DocumentStore, LabeledExample};
use crate::types::{Label, SmoothedPrediction};

pub type SharedSensor = Arc<Mutex<Box<dyn SensorLink>>>;

/// Why a worker loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// The running flag was cleared.
    Stopped,
    /// The requested number of ticks elapsed.
    DurationElapsed(u32),
    /// The prediction receiver was dropped.
    ConsumerGone,
    ConnectFailed(SensorError),
    StartRejected,
    Tick(TickError),
    Store(StoreError),
    Classifier(ClassifierError),
    Panicked,
}

impl WorkerExit {
    pub fn is_normal(&self) -> bool {
        matches!(
            self,
            WorkerExit::Stopped | WorkerExit::DurationElapsed(_) | WorkerExit::ConsumerGone
        )
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Stopped => f.write_str("stopped on request"),
            WorkerExit::DurationElapsed(ticks) => write!(f, "finished after {ticks} ticks"),
            WorkerExit::ConsumerGone => f.write_str("prediction consumer disconnected"),
            WorkerExit::ConnectFailed(e) => write!(f, "sensor connect failed: {e}"),
            WorkerExit::StartRejected => f.write_str("sensor refused start_reading"),
            WorkerExit::Tick(e) => write!(f, "unrecoverable tick error: {e}"),
            WorkerExit::Store(e) => write!(f, "storage failed: {e}"),
            WorkerExit::Classifier(e) => write!(f, "prediction failed: {e}"),
            WorkerExit::Panicked => f.write_str("worker panicked"),
        }
    }
}

/// Everything a worker needs, cloned out of the orchestrator at spawn time.
pub struct WorkerContext {
    pub sensor: SharedSensor,
    pub pipeline: SignalPipeline,
    pub running: Arc<AtomicBool>,
    pub identity: String,
}

/// Stops and disconnects the sensor on every exit path, unwinding included.
struct ActiveLink<'a> {
    sensor: &'a mut dyn SensorLink,
}

impl Drop for ActiveLink<'_> {
    fn drop(&mut self) {
        self.sensor.stop_reading();
        self.sensor.disconnect();
        debug!("sensor released");
    }
}

/// Connects, starts streaming, then feeds one feature vector per tick to
/// `on_features` until it breaks, the flag clears or `max_ticks` elapse.
fn drive<F>(ctx: &WorkerContext, max_ticks: Option<u32>, mut on_features: F) -> WorkerExit
where
    F: FnMut(FeatureVector) -> ControlFlow<WorkerExit>,
{
    let mut guard = ctx.sensor.lock().unwrap_or_else(|e| e.into_inner());
    let sensor: &mut dyn SensorLink = &mut **guard;
    if let Err(e) = sensor.connect() {
        return WorkerExit::ConnectFailed(e);
    }
    let mut link = ActiveLink { sensor };
    if !link.sensor.start_reading() {
        return WorkerExit::StartRejected;
    }

    let mut ticks = 0u32;
    while ctx.running.load(Ordering::SeqCst) {
        if max_ticks.is_some_and(|limit| ticks >= limit) {
            return WorkerExit::DurationElapsed(ticks);
        }
        ticks += 1;
        match ctx.pipeline.pump_once(&mut *link.sensor) {
            Ok(features) => {
                if let ControlFlow::Break(exit) = on_features(features) {
                    return exit;
                }
            }
            Err(e) if e.is_recoverable() => warn!("dropping window {ticks}: {e}"),
            Err(e) => return WorkerExit::Tick(e),
        }
    }
    WorkerExit::Stopped
}

/// Runs `body` on a named thread, catching panics and logging the exit.
fn spawn_logged<F>(name: &str, body: F) -> std::io::Result<JoinHandle<WorkerExit>>
where
    F: FnOnce() -> WorkerExit + Send + 'static,
{
    let label = name.to_string();
    thread::Builder::new().name(label.clone()).spawn(move || {
        let exit = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(WorkerExit::Panicked);
        if exit.is_normal() {
            info!("{label} exited: {exit}");
        } else {
            error!("{label} exited: {exit}");
        }
        exit
    })
}

/// Stores one labelled example per good window.
pub fn spawn_collection(
    ctx: WorkerContext,
    documents: Arc<dyn DocumentStore>,
    label: Label,
    max_ticks: Option<u32>,
) -> std::io::Result<JoinHandle<WorkerExit>> {
    spawn_logged("collect-worker", move || {
        info!("collecting {label} data for {}", ctx.identity);
        let mut stored = 0usize;
        let exit = drive(&ctx, max_ticks, |features| {
            let example = LabeledExample {
                identity: ctx.identity.clone(),
                features,
                label,
            };
            match documents.insert_example(&example) {
                Ok(()) => {
                    stored += 1;
                    ControlFlow::Continue(())
                }
                Err(e) => ControlFlow::Break(WorkerExit::Store(e)),
            }
        });
        info!("stored {stored} {label} windows for {}", ctx.identity);
        exit
    })
}

/// Classifies each good window and emits a smoothed label per full batch.
pub fn spawn_prediction(
    ctx: WorkerContext,
    classifier: Arc<Classifier>,
    vote_batch: usize,
    tx: Sender<SmoothedPrediction>,
) -> std::io::Result<JoinHandle<WorkerExit>> {
    spawn_logged("predict-worker", move || {
        info!("predicting for {}", ctx.identity);
        let mut votes = VoteBuffer::new(vote_batch);
        drive(&ctx, None, |features| {
            let label = match classifier.predict_one(&features) {
                Ok(label) => label,
                Err(e) => return ControlFlow::Break(WorkerExit::Classifier(e)),
            };
            debug!("raw prediction {label}");
            if let Some(smoothed) = votes.push(label) {
                info!(
                    "smoothed prediction {} ({}/{} focused)",
                    smoothed.label,
                    smoothed.focused_votes(),
                    smoothed.votes.len()
                );
                if tx.send(smoothed).is_err() {
                    return ControlFlow::Break(WorkerExit::ConsumerGone);
                }
            }
            ControlFlow::Continue(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PreprocessConfig, FREQ};
    use crate::sensor::{ReplaySensor, SimulatedSensor};
    use crate::store::MemoryStore;

    fn context(sensor: Box<dyn SensorLink>) -> WorkerContext {
        WorkerContext {
            sensor: Arc::new(Mutex::new(sensor)),
            pipeline: SignalPipeline::new(&PreprocessConfig::default()).unwrap(),
            running: Arc::new(AtomicBool::new(true)),
            identity: "ada".into(),
        }
    }

    #[test]
    fn collection_stops_after_requested_ticks_and_releases_sensor() {
        let replay = ReplaySensor::new(vec![vec![2048; FREQ]]).repeating();
        let log = replay.command_log();
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_collection(
            context(Box::new(replay)),
            store.clone(),
            Label::Focused,
            Some(3),
        )
        .unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            WorkerExit::DurationElapsed(3)
        ));
        assert_eq!(store.example_count(), 3);
        assert_eq!(log.count("stop_reading"), 1);
        assert_eq!(log.count("disconnect"), 1);
    }

    #[test]
    fn bad_windows_are_dropped_without_ending_the_loop() {
        let replay = ReplaySensor::new(vec![
            vec![2048; FREQ],
            vec![2048; 12],
            vec![0; FREQ],
            vec![2048; FREQ],
        ]);
        let store = Arc::new(MemoryStore::new());
        let exit = spawn_collection(context(Box::new(replay)), store.clone(), Label::Relaxing, None)
            .unwrap()
            .join()
            .unwrap();
        // The fifth read hits the end of the queue.
        assert!(matches!(
            exit,
            WorkerExit::Tick(TickError::Sensor(SensorError::Exhausted))
        ));
        assert_eq!(store.example_count(), 2);
    }

    #[test]
    fn refused_connect_ends_the_worker() {
        let replay = ReplaySensor::new(Vec::<Vec<i32>>::new()).refusing_connect();
        let store = Arc::new(MemoryStore::new());
        let exit = spawn_collection(context(Box::new(replay)), store, Label::Focused, None)
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(exit, WorkerExit::ConnectFailed(_)));
        assert!(!exit.is_normal());
    }

    #[test]
    fn cleared_flag_stops_before_reading() {
        let sensor = SimulatedSensor::new(Label::Focused, 1);
        let ctx = context(Box::new(sensor));
        ctx.running.store(false, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::new());
        let exit = spawn_collection(ctx, store.clone(), Label::Focused, None)
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(exit, WorkerExit::Stopped));
        assert_eq!(store.example_count(), 0);
    }
}
