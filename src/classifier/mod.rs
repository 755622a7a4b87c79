// src/classifier/mod.rs
//! Standardize-then-RBF-SVM classifier over [`FeatureVector`]s.

pub mod metrics;
pub mod scaler;
pub mod store;
pub mod svm;

pub use metrics::{ClassMetrics, Evaluation};
pub use scaler::StandardScaler;
pub use store::{
    model_key, FileModelStore, MemoryModelStore, ModelArtifact, ModelArtifacts, ModelStore,
    ScalerArtifact,
};
pub use svm::{SvmModel, SvmParams};

use log::{info, warn};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;

use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::types::Label;

/// Outcome of [`Classifier::train_with_split`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrainReport {
    pub n_train: usize,
    pub n_test: usize,
    pub n_support: usize,
    /// Scores on the held-out split.
    pub evaluation: Evaluation,
}

impl fmt::Display for TrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "trained on {} windows, held out {}, {} support vectors",
            self.n_train, self.n_test, self.n_support
        )?;
        write!(f, "{}", self.evaluation)
    }
}

/// Stacks feature vectors into an `n x 14` matrix.
pub fn features_to_matrix(rows: &[FeatureVector]) -> Array2<f64> {
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.to_array()).collect();
    Array2::from_shape_vec((rows.len(), FEATURE_COUNT), flat)
        .unwrap_or_else(|_| Array2::zeros((0, FEATURE_COUNT)))
}

fn to_target(label: Label) -> f64 {
    match label {
        Label::Focused => 1.0,
        Label::Relaxing => -1.0,
    }
}

fn from_target(value: f64) -> Label {
    if value > 0.0 {
        Label::Focused
    } else {
        Label::Relaxing
    }
}

fn distinct_labels(labels: &[Label]) -> usize {
    Label::ALL
        .iter()
        .filter(|l| labels.contains(l))
        .count()
}

/// Deterministic shuffled split; returns `(train, test)` row indices.
fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let train = indices.split_off(n_test);
    (train, indices)
}

#[derive(Clone, Debug)]
pub struct Classifier {
    config: ClassifierConfig,
    scaler: Option<StandardScaler>,
    model: Option<SvmModel>,
    pair_token: u64,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            scaler: None,
            model: None,
            pair_token: 0,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.scaler.is_some() && self.model.is_some()
    }

    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    pub fn model(&self) -> Option<&SvmModel> {
        self.model.as_ref()
    }

    /// Fits scaler and SVM, scoring on a seeded 80/20 split. Leaves `self`
    /// untouched on failure.
    pub fn train_with_split(
        &mut self,
        x: &Array2<f64>,
        y: &[Label],
    ) -> Result<TrainReport, ClassifierError> {
        let n = x.nrows();
        if n != y.len() {
            return Err(ClassifierError::LengthMismatch {
                rows: n,
                labels: y.len(),
            });
        }
        let classes = distinct_labels(y);
        if classes < 2 {
            return Err(ClassifierError::SingleClass(classes));
        }
        if n < 3 {
            return Err(ClassifierError::TooFewSamples(n));
        }

        let scaler = StandardScaler::fit(x)?;
        let scaled = scaler.transform(x)?;
        let (train_idx, test_idx) =
            split_indices(n, self.config.test_fraction, self.config.seed);

        let x_train = scaled.select(ndarray::Axis(0), &train_idx);
        let y_train: Vec<f64> = train_idx.iter().map(|&i| to_target(y[i])).collect();
        let train_labels: Vec<Label> = train_idx.iter().map(|&i| y[i]).collect();
        let train_classes = distinct_labels(&train_labels);
        if train_classes < 2 {
            return Err(ClassifierError::SingleClass(train_classes));
        }

        let model = SvmModel::fit(
            &x_train,
            &y_train,
            SvmParams {
                c: self.config.c,
                gamma: None,
                tolerance: self.config.tolerance,
                max_iterations: self.config.max_iterations,
                ..SvmParams::default()
            },
        )?;

        let x_test = scaled.select(ndarray::Axis(0), &test_idx);
        let actual: Vec<Label> = test_idx.iter().map(|&i| y[i]).collect();
        let predicted: Vec<Label> = model.predict(&x_test).into_iter().map(from_target).collect();
        let evaluation = Evaluation::from_predictions(&actual, &predicted);

        let report = TrainReport {
            n_train: train_idx.len(),
            n_test: test_idx.len(),
            n_support: model.support_vectors.len(),
            evaluation,
        };
        info!(
            "classifier trained: {} train / {} test, accuracy {:.3}",
            report.n_train, report.n_test, report.evaluation.accuracy
        );

        self.scaler = Some(scaler);
        self.model = Some(model);
        self.pair_token = rand::random();
        Ok(report)
    }

    /// Scores the current model on arbitrary labelled rows.
    pub fn evaluate(&self, x: &Array2<f64>, y: &[Label]) -> Result<Evaluation, ClassifierError> {
        if x.nrows() != y.len() {
            return Err(ClassifierError::LengthMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }
        let predicted = self.predict(x)?;
        Ok(Evaluation::from_predictions(y, &predicted))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<Label>, ClassifierError> {
        let scaler = self.scaler.as_ref().ok_or(ClassifierError::ScalerNotFitted)?;
        let model = self.model.as_ref().ok_or(ClassifierError::ModelNotTrained)?;
        let scaled = scaler.transform(x)?;
        Ok(model.predict(&scaled).into_iter().map(from_target).collect())
    }

    pub fn predict_one(&self, features: &FeatureVector) -> Result<Label, ClassifierError> {
        let row = features_to_matrix(std::slice::from_ref(features));
        self.predict(&row)?
            .into_iter()
            .next()
            .ok_or(ClassifierError::ModelNotTrained)
    }

    pub fn save(&self, store: &dyn ModelStore, identity: &str) -> Result<(), ClassifierError> {
        let scaler = self.scaler.clone().ok_or(ClassifierError::ScalerNotFitted)?;
        let model = self.model.clone().ok_or(ClassifierError::ModelNotTrained)?;
        let artifacts = ModelArtifacts {
            scaler: ScalerArtifact {
                pair_token: self.pair_token,
                n_features: scaler.n_features(),
                scaler,
            },
            model: ModelArtifact {
                pair_token: self.pair_token,
                n_features: model.n_features(),
                model,
            },
        };
        store.save_pair(&model_key(identity), &artifacts)
    }

    /// Replaces scaler and model together; on error neither changes.
    pub fn load(&mut self, store: &dyn ModelStore, identity: &str) -> Result<(), ClassifierError> {
        let artifacts = store.load_pair(&model_key(identity))?;
        artifacts.check_pair()?;
        if artifacts.scaler.n_features != FEATURE_COUNT {
            warn!(
                "model for {identity} expects {} features, extractor produces {FEATURE_COUNT}",
                artifacts.scaler.n_features
            );
            return Err(ClassifierError::FeatureCount {
                expected: FEATURE_COUNT,
                actual: artifacts.scaler.n_features,
            });
        }
        self.pair_token = artifacts.scaler.pair_token;
        self.scaler = Some(artifacts.scaler.scaler);
        self.model = Some(artifacts.model.model);
        info!("classifier loaded for {identity}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Two well-separated clusters in feature space.
    fn dataset(n_per_class: usize, seed: u64) -> (Vec<FeatureVector>, Vec<Label>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for label in Label::ALL {
            let centre = if label == Label::Focused { 5.0 } else { -5.0 };
            for _ in 0..n_per_class {
                let mut values = [0.0; FEATURE_COUNT];
                for v in values.iter_mut() {
                    *v = centre + rng.gen_range(-1.0..1.0);
                }
                rows.push(FeatureVector::from_array(values));
                labels.push(label);
            }
        }
        (rows, labels)
    }

    #[test]
    fn split_is_reproducible_and_holds_out_a_fifth() {
        let (train_a, test_a) = split_indices(50, 0.2, 42);
        let (train_b, test_b) = split_indices(50, 0.2, 42);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a.len(), 10);
        assert_eq!(train_a.len(), 40);
        let (_, test_c) = split_indices(50, 0.2, 43);
        assert_ne!(test_a, test_c);
    }

    #[test]
    fn trains_and_predicts_separable_data() {
        let (rows, labels) = dataset(20, 1);
        let mut clf = Classifier::new(ClassifierConfig::default());
        let report = clf
            .train_with_split(&features_to_matrix(&rows), &labels)
            .unwrap();
        assert_eq!(report.n_test, 8);
        assert_eq!(report.evaluation.accuracy, 1.0);
        assert_eq!(clf.predict_one(&rows[0]).unwrap(), Label::Relaxing);
        assert_eq!(clf.predict_one(&rows[39]).unwrap(), Label::Focused);
        let full = clf.evaluate(&features_to_matrix(&rows), &labels).unwrap();
        assert_eq!(full.accuracy, 1.0);
    }

    #[test]
    fn single_class_fails_without_mutating() {
        let (rows, _) = dataset(5, 2);
        let labels = vec![Label::Focused; rows.len()];
        let mut clf = Classifier::new(ClassifierConfig::default());
        assert!(matches!(
            clf.train_with_split(&features_to_matrix(&rows), &labels),
            Err(ClassifierError::SingleClass(1))
        ));
        assert!(!clf.is_trained());
    }

    #[test]
    fn predict_before_fit_is_an_error() {
        let clf = Classifier::new(ClassifierConfig::default());
        assert!(matches!(
            clf.predict_one(&FeatureVector::default()),
            Err(ClassifierError::ScalerNotFitted)
        ));
    }

    #[test]
    fn save_and_load_restore_identical_predictions() {
        let (rows, labels) = dataset(15, 3);
        let x = features_to_matrix(&rows);
        let mut trained = Classifier::new(ClassifierConfig::default());
        trained.train_with_split(&x, &labels).unwrap();

        let store = MemoryModelStore::new();
        trained.save(&store, "ada").unwrap();
        let mut restored = Classifier::new(ClassifierConfig::default());
        restored.load(&store, "ada").unwrap();
        assert_eq!(restored.predict(&x).unwrap(), trained.predict(&x).unwrap());
        assert_eq!(restored.scaler(), trained.scaler());
    }

    #[test]
    fn lookalike_identity_cannot_load_anothers_model() {
        let (rows, labels) = dataset(10, 5);
        let mut trained = Classifier::new(ClassifierConfig::default());
        trained
            .train_with_split(&features_to_matrix(&rows), &labels)
            .unwrap();
        let store = MemoryModelStore::new();
        trained.save(&store, "a@b").unwrap();

        let mut other = Classifier::new(ClassifierConfig::default());
        assert!(other.load(&store, "a_b").is_err());
        assert!(!other.is_trained());
        other.load(&store, "a@b").unwrap();
    }

    #[test]
    fn failed_load_keeps_previous_pair() {
        let (rows, labels) = dataset(10, 4);
        let mut clf = Classifier::new(ClassifierConfig::default());
        clf.train_with_split(&features_to_matrix(&rows), &labels)
            .unwrap();
        let store = MemoryModelStore::new();
        assert!(clf.load(&store, "nobody").is_err());
        assert!(clf.is_trained());
    }
}
