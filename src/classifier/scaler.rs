use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// Zero-mean, unit-variance standardization fitted on training rows only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Population standard deviation; 1.0 for constant columns.
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Result<Self, ClassifierError> {
        if x.nrows() == 0 {
            return Err(ClassifierError::TooFewSamples(0));
        }
        let mean: Array1<f64> = x
            .mean_axis(Axis(0))
            .ok_or(ClassifierError::TooFewSamples(0))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        Ok(Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, ClassifierError> {
        if x.ncols() != self.n_features() {
            return Err(ClassifierError::FeatureCount {
                expected: self.n_features(),
                actual: x.ncols(),
            });
        }
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        Ok((x - &mean) / &scale)
    }
}
