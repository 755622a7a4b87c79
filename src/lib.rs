// src/lib.rs
//! Single-channel EEG focus/relax pipeline.
//!
//! A serial sensor yields one-second windows of raw codes; each window is
//! cleaned, notch and band-pass filtered, reduced to fourteen features and
//! either stored with a label or classified by a per-user SVM. The
//! [`session::SessionOrchestrator`] runs one of those activities at a time on
//! a background worker.

pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod preprocess;
pub mod sensor;
pub mod session;
pub mod store;
pub mod types;

pub use classifier::{
    Classifier, Evaluation, FileModelStore, MemoryModelStore, ModelStore, TrainReport,
};
pub use config::{Config, FREQ};
pub use error::{ClassifierError, PreprocessError, SensorError, SessionError, StoreError};
pub use features::{FeatureExtractor, FeatureVector};
pub use pipeline::SignalPipeline;
pub use preprocess::Preprocessor;
pub use sensor::{ReplaySensor, SampleWindow, SensorLink, SerialSensor, SimulatedSensor};
pub use session::{SessionOrchestrator, TrainResult};
pub use store::{DocumentStore, JsonFileStore, LabeledExample, MemoryStore, UserFlags};
pub use types::{Label, Mode, SessionStatus, SmoothedPrediction};
