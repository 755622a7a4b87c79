// src/error.rs
use thiserror::Error;

use crate::types::{Label, Mode};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("serial port {0} is already open")]
    PortBusy(String),
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial link is not connected")]
    NotConnected,
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("incomplete window: got {got} of {expected} samples")]
    IncompleteWindow { got: usize, expected: usize },
    #[error("source exhausted")]
    Exhausted,
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("sampling rate must be greater than zero")]
    InvalidSampleRate,
    #[error("invalid filter band {low_hz}-{high_hz} Hz for sampling rate {sample_rate_hz} Hz")]
    InvalidBand {
        low_hz: f64,
        high_hz: f64,
        sample_rate_hz: f64,
    },
    #[error("window of {len} samples is not longer than the filter settle length {settle}")]
    WindowTooShort { len: usize, settle: usize },
    #[error("every sample in the window is missing; nothing to interpolate from")]
    AllMissing,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("training data needs two distinct labels, found {0}")]
    SingleClass(usize),
    #[error("feature matrix has {rows} rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("expected {expected} features per row, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("not enough samples to split: {0}")]
    TooFewSamples(usize),
    #[error("scaler has not been fitted or loaded")]
    ScalerNotFitted,
    #[error("model has not been trained or loaded")]
    ModelNotTrained,
    #[error("model artifact pair mismatch: {0}")]
    PairMismatch(String),
    #[error("model artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("model artifact is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("document store record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a {active} session is already active")]
    Busy { active: Mode },
    #[error("no {0} session is active")]
    NotActive(&'static str),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("{0} data has not been collected")]
    DataNotCollected(Label),
    #[error("model for {0} is already trained")]
    AlreadyTrained(String),
    #[error("model for {0} has not been trained")]
    ModelNotTrained(String),
    #[error("collection did not finish: {0}")]
    CollectionIncomplete(String),
    #[error("no classifier is loaded for {0}")]
    ModelNotLoaded(String),
    #[error("worker thread could not be spawned: {0}")]
    Spawn(std::io::Error),
    #[error("session state lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

/// Why one per-second tick produced no feature vector.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("window read failed: {0}")]
    Sensor(#[from] SensorError),
    #[error("window conditioning failed: {0}")]
    Preprocess(#[from] PreprocessError),
}

impl TickError {
    /// Data-integrity failures drop the window; anything else ends the worker.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TickError::Sensor(SensorError::NotConnected) => false,
            TickError::Sensor(SensorError::Io(_)) => false,
            TickError::Sensor(SensorError::Exhausted) => false,
            TickError::Sensor(_) => true,
            TickError::Preprocess(PreprocessError::AllMissing) => true,
            TickError::Preprocess(_) => false,
        }
    }
}
