// src/preprocess/mod.rs
//! Signal conditioner: artifact repair followed by notch and band-pass
//! zero-phase filtering.

pub mod clean;
pub mod filter;

pub use clean::{clean_data, is_missing};
pub use filter::{BiquadCoeffs, SosFilter};

use crate::config::PreprocessConfig;
use crate::error::PreprocessError;
use crate::sensor::SampleWindow;

/// A repaired and filtered window; every value is finite.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionedWindow {
    values: Vec<f64>,
}

impl ConditionedWindow {
    /// `None` if any value is NaN or infinite.
    pub fn new(values: Vec<f64>) -> Option<Self> {
        values
            .iter()
            .all(|v| v.is_finite())
            .then_some(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Clone, Debug)]
struct FilterBank {
    notch: SosFilter,
    band_pass: SosFilter,
}

/// Owns the filter designs for one sampling configuration.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    config: PreprocessConfig,
    filters: FilterBank,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        let filters = Self::design(&config)?;
        Ok(Self { config, filters })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Swap in new parameters and redesign both filters.
    pub fn set_config(&mut self, config: PreprocessConfig) -> Result<(), PreprocessError> {
        self.config = config;
        self.initialize_filter()
    }

    /// Designs the notch and band-pass filters from the current parameters.
    pub fn initialize_filter(&mut self) -> Result<(), PreprocessError> {
        self.filters = Self::design(&self.config)?;
        Ok(())
    }

    fn design(config: &PreprocessConfig) -> Result<FilterBank, PreprocessError> {
        let notch = SosFilter::notch(config.notch_freq, config.notch_q, config.sampling_rate)?;
        let band_pass = SosFilter::butter_bandpass(
            config.order,
            config.lowcut,
            config.highcut,
            config.sampling_rate,
        )?;
        Ok(FilterBank { notch, band_pass })
    }

    /// Shortest window length that can be filtered is one more than this.
    pub fn settle_len(&self) -> usize {
        self.filters
            .notch
            .settle_len()
            .max(self.filters.band_pass.settle_len())
    }

    pub fn clean_data(&self, samples: &[i32]) -> Result<Vec<f64>, PreprocessError> {
        clean_data(samples, self.config.max_code)
    }

    /// Notch, then band-pass; both forward-backward.
    pub fn apply_filter(&self, data: &[f64]) -> Result<Vec<f64>, PreprocessError> {
        let settle = self.settle_len();
        if data.len() <= settle {
            return Err(PreprocessError::WindowTooShort {
                len: data.len(),
                settle,
            });
        }
        let notched = self.filters.notch.filtfilt(data)?;
        self.filters.band_pass.filtfilt(&notched)
    }

    pub fn preprocess(&self, window: &SampleWindow) -> Result<ConditionedWindow, PreprocessError> {
        self.preprocess_samples(window.samples())
    }

    /// Same as [`Preprocessor::preprocess`] for raw codes of any length.
    pub fn preprocess_samples(&self, samples: &[i32]) -> Result<ConditionedWindow, PreprocessError> {
        let cleaned = self.clean_data(samples)?;
        let filtered = self.apply_filter(&cleaned)?;
        ConditionedWindow::new(filtered).ok_or(PreprocessError::AllMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FREQ;
    use std::f64::consts::PI;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(PreprocessConfig::default()).unwrap()
    }

    #[test]
    fn full_window_comes_out_finite_and_same_length() {
        let raw: Vec<i32> = (0..FREQ)
            .map(|i| {
                let t = i as f64 / FREQ as f64;
                (2048.0 + 200.0 * (2.0 * PI * 10.0 * t).sin()) as i32
            })
            .collect();
        let mut corrupted = raw.clone();
        corrupted[10] = 0;
        corrupted[200] = 5000;
        let window = SampleWindow::new(corrupted).unwrap();
        let out = preprocessor().preprocess(&window).unwrap();
        assert_eq!(out.len(), FREQ);
        assert!(out.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn band_pass_strips_the_dc_baseline() {
        let raw = vec![2048; FREQ];
        let out = preprocessor().preprocess_samples(&raw).unwrap();
        assert!(out.values().iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn short_windows_are_a_configuration_error() {
        let p = preprocessor();
        assert_eq!(p.settle_len(), 27);
        assert!(matches!(
            p.preprocess_samples(&[100; 20]),
            Err(PreprocessError::WindowTooShort { len: 20, settle: 27 })
        ));
    }

    #[test]
    fn all_missing_window_is_dropped() {
        let window = SampleWindow::new(vec![0; FREQ]).unwrap();
        assert!(matches!(
            preprocessor().preprocess(&window),
            Err(PreprocessError::AllMissing)
        ));
    }

    #[test]
    fn invalid_band_is_rejected_at_construction() {
        let config = PreprocessConfig {
            highcut: 400.0,
            ..PreprocessConfig::default()
        };
        assert!(Preprocessor::new(config).is_err());
    }

    #[test]
    fn set_config_redesigns_filters() {
        let mut p = preprocessor();
        p.set_config(PreprocessConfig {
            order: 2,
            ..PreprocessConfig::default()
        })
        .unwrap();
        assert_eq!(p.settle_len(), 15);
    }
}
