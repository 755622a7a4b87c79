// src/session/mod.rs
//! The session state machine: at most one of labelled collection or live
//! prediction runs at a time, on a background worker that owns the sensor.

pub mod vote;
pub mod worker;

pub use vote::{majority_vote, VoteBuffer};
pub use worker::{SharedSensor, WorkerExit};

use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::classifier::{features_to_matrix, Classifier, ModelStore, TrainReport};
use crate::config::Config;
use crate::error::SessionError;
use crate::pipeline::SignalPipeline;
use crate::sensor::SensorLink;
use crate::store::{DocumentStore, UserFlags};
use crate::types::{Label, Mode, SessionStatus, SmoothedPrediction};
use worker::WorkerContext;

pub type TrainResult = Result<TrainReport, SessionError>;

const COLLECT_POLL: Duration = Duration::from_millis(50);

struct SessionState {
    mode: Mode,
    identity: Option<String>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<WorkerExit>>,
    /// How the most recent worker ended, until someone takes it.
    last_exit: Option<WorkerExit>,
}

impl SessionState {
    fn idle() -> Self {
        Self {
            mode: Mode::Idle,
            identity: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            last_exit: None,
        }
    }

    fn finish(&mut self, exit: WorkerExit) {
        *self = Self {
            last_exit: Some(exit),
            ..Self::idle()
        };
    }

    /// Returns to idle if the worker already exited on its own.
    fn reap(&mut self) {
        let finished = self.worker.as_ref().is_some_and(|h| h.is_finished());
        if !finished {
            return;
        }
        let exit = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(exit)) => {
                info!("{} worker reaped: {exit}", self.mode);
                exit
            }
            Some(Err(_)) => {
                warn!("{} worker reaped after a panic", self.mode);
                WorkerExit::Panicked
            }
            None => return,
        };
        self.finish(exit);
    }
}

pub struct SessionOrchestrator {
    config: Config,
    pipeline: SignalPipeline,
    sensor: SharedSensor,
    documents: Arc<dyn DocumentStore>,
    models: Arc<dyn ModelStore>,
    classifiers: Mutex<HashMap<String, Arc<Classifier>>>,
    state: Mutex<SessionState>,
}

impl SessionOrchestrator {
    pub fn new(
        config: Config,
        sensor: Box<dyn SensorLink>,
        documents: Arc<dyn DocumentStore>,
        models: Arc<dyn ModelStore>,
    ) -> Result<Self, SessionError> {
        let pipeline = SignalPipeline::new(&config.preprocess)?;
        Ok(Self {
            config,
            pipeline,
            sensor: Arc::new(Mutex::new(sensor)),
            documents,
            models,
            classifiers: Mutex::new(HashMap::new()),
            state: Mutex::new(SessionState::idle()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        self.state.lock().map_err(|_| SessionError::Poisoned)
    }

    fn context(&self, identity: &str, running: &Arc<AtomicBool>) -> WorkerContext {
        WorkerContext {
            sensor: Arc::clone(&self.sensor),
            pipeline: self.pipeline.clone(),
            running: Arc::clone(running),
            identity: identity.to_string(),
        }
    }

    /// Idle -> Collecting(label). With `duration_hint` the worker stops
    /// itself after that many one-second ticks.
    pub fn start_collection(
        &self,
        identity: &str,
        label: Label,
        duration_hint: Option<u32>,
    ) -> Result<(), SessionError> {
        let mut state = self.lock_state()?;
        state.reap();
        if !state.mode.is_idle() {
            return Err(SessionError::Busy { active: state.mode });
        }
        self.documents.ensure_user(identity)?;

        let running = Arc::new(AtomicBool::new(true));
        let handle = worker::spawn_collection(
            self.context(identity, &running),
            Arc::clone(&self.documents),
            label,
            duration_hint,
        )
        .map_err(SessionError::Spawn)?;

        *state = SessionState {
            mode: Mode::Collecting(label),
            identity: Some(identity.to_string()),
            running,
            worker: Some(handle),
            last_exit: None,
        };
        info!("collection of {label} started for {identity}");
        Ok(())
    }

    pub fn stop_collection(&self) -> Result<(), SessionError> {
        self.stop_worker(|mode| matches!(mode, Mode::Collecting(_)), "collection")
    }

    /// Collects `ticks` windows of `label`, blocking until the worker ends.
    /// The label is marked collected only if every tick ran; any other
    /// ending leaves the user's flags untouched.
    pub fn collect_for(
        &self,
        identity: &str,
        label: Label,
        ticks: u32,
    ) -> Result<UserFlags, SessionError> {
        self.start_collection(identity, label, Some(ticks))?;
        let exit = loop {
            {
                let mut state = self.lock_state()?;
                state.reap();
                if state.mode.is_idle() {
                    break state.last_exit.take();
                }
            }
            thread::sleep(COLLECT_POLL);
        };
        match exit {
            Some(WorkerExit::DurationElapsed(_)) => self.mark_data_collected(identity, label),
            Some(other) => Err(SessionError::CollectionIncomplete(other.to_string())),
            None => Err(SessionError::CollectionIncomplete(
                "session was stopped elsewhere".to_string(),
            )),
        }
    }

    /// Idle -> Predicting. Needs a classifier loaded via [`Self::load_model`].
    pub fn start_prediction(
        &self,
        identity: &str,
    ) -> Result<Receiver<SmoothedPrediction>, SessionError> {
        let mut state = self.lock_state()?;
        state.reap();
        if !state.mode.is_idle() {
            return Err(SessionError::Busy { active: state.mode });
        }
        let classifier = self
            .classifiers
            .lock()
            .map_err(|_| SessionError::Poisoned)?
            .get(identity)
            .cloned()
            .ok_or_else(|| SessionError::ModelNotLoaded(identity.to_string()))?;

        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let handle = worker::spawn_prediction(
            self.context(identity, &running),
            classifier,
            self.config.session.vote_batch,
            tx,
        )
        .map_err(SessionError::Spawn)?;

        *state = SessionState {
            mode: Mode::Predicting,
            identity: Some(identity.to_string()),
            running,
            worker: Some(handle),
            last_exit: None,
        };
        info!("prediction started for {identity}");
        Ok(rx)
    }

    pub fn stop_prediction(&self) -> Result<(), SessionError> {
        self.stop_worker(|mode| matches!(mode, Mode::Predicting), "prediction")
    }

    /// Clears the running flag and waits for the worker outside the state
    /// lock, so `status` stays answerable during the last tick.
    fn stop_worker(
        &self,
        expected: fn(Mode) -> bool,
        what: &'static str,
    ) -> Result<(), SessionError> {
        let handle = {
            let mut state = self.lock_state()?;
            if !expected(state.mode) {
                return Err(SessionError::NotActive(what));
            }
            state.running.store(false, Ordering::SeqCst);
            state.worker.take()
        };
        let exit = match handle.map(JoinHandle::join) {
            Some(Ok(exit)) => {
                info!("{what} worker joined: {exit}");
                exit
            }
            Some(Err(_)) => {
                warn!("{what} worker panicked");
                WorkerExit::Panicked
            }
            None => WorkerExit::Stopped,
        };
        let mut state = self.lock_state()?;
        if expected(state.mode) && state.worker.is_none() {
            state.finish(exit);
        }
        info!("{what} stopped");
        Ok(())
    }

    /// How the last finished worker ended; cleared by this call and by
    /// the next start.
    pub fn take_last_exit(&self) -> Result<Option<WorkerExit>, SessionError> {
        let mut state = self.lock_state()?;
        state.reap();
        Ok(state.last_exit.take())
    }

    pub fn status(&self) -> Result<SessionStatus, SessionError> {
        let mut state = self.lock_state()?;
        state.reap();
        Ok(SessionStatus {
            mode: state.mode,
            identity: state.identity.clone(),
            running: state.worker.is_some() && state.running.load(Ordering::SeqCst),
        })
    }

    fn existing_flags(&self, identity: &str) -> Result<UserFlags, SessionError> {
        self.documents
            .user_flags(identity)?
            .ok_or_else(|| SessionError::UserNotFound(identity.to_string()))
    }

    /// Trains on every stored example for `identity`, persists the pair and
    /// marks the user trained. Requires both labels collected.
    pub fn train_model(&self, identity: &str) -> TrainResult {
        let mut flags = self.existing_flags(identity)?;
        if flags.model_trained {
            return Err(SessionError::AlreadyTrained(identity.to_string()));
        }
        if let Some(missing) = Label::ALL.into_iter().find(|l| !flags.collected(*l)) {
            return Err(SessionError::DataNotCollected(missing));
        }

        let examples = self.documents.examples_for(identity)?;
        info!("training {identity} on {} stored windows", examples.len());
        let features: Vec<_> = examples.iter().map(|e| e.features).collect();
        let labels: Vec<Label> = examples.iter().map(|e| e.label).collect();
        let x = features_to_matrix(&features);

        let mut classifier = Classifier::new(self.config.classifier.clone());
        let report = classifier.train_with_split(&x, &labels)?;
        info!("held-out report for {identity}:\n{}", report.evaluation);
        let full = classifier.evaluate(&x, &labels)?;
        info!("full-dataset report for {identity}:\n{full}");

        classifier.save(self.models.as_ref(), identity)?;
        flags.model_trained = true;
        self.documents.set_user_flags(identity, flags)?;
        Ok(report)
    }

    /// Loads the persisted pair so [`Self::start_prediction`] can use it.
    pub fn load_model(&self, identity: &str) -> Result<(), SessionError> {
        let flags = self.existing_flags(identity)?;
        if !flags.model_trained {
            return Err(SessionError::ModelNotTrained(identity.to_string()));
        }
        let mut classifier = Classifier::new(self.config.classifier.clone());
        classifier.load(self.models.as_ref(), identity)?;
        self.classifiers
            .lock()
            .map_err(|_| SessionError::Poisoned)?
            .insert(identity.to_string(), Arc::new(classifier));
        Ok(())
    }

    pub fn is_model_loaded(&self, identity: &str) -> bool {
        self.classifiers
            .lock()
            .map(|c| c.contains_key(identity))
            .unwrap_or(false)
    }

    /// Records that `label` data is complete for `identity`.
    pub fn mark_data_collected(
        &self,
        identity: &str,
        label: Label,
    ) -> Result<UserFlags, SessionError> {
        let mut flags = self.documents.ensure_user(identity)?;
        flags.set_collected(label);
        self.documents.set_user_flags(identity, flags)?;
        info!("{identity}: {} set", label.collected_flag());
        Ok(flags)
    }

    pub fn data_status(&self, identity: &str, label: Label) -> Result<bool, SessionError> {
        Ok(self.existing_flags(identity)?.collected(label))
    }

    pub fn model_status(&self, identity: &str) -> Result<bool, SessionError> {
        Ok(self.existing_flags(identity)?.model_trained)
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = state.worker.take() {
            handle.join().ok();
        }
    }
}
