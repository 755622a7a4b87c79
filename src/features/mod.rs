// src/features/mod.rs
//! Reduces one conditioned window to the fixed 14-field feature vector.
//!
//! Field order is the contract between storage and the classifier: the
//! named JSON form, [`FeatureVector::to_array`] and [`FEATURE_NAMES`] all
//! follow the same sequence.

pub mod psd;

pub use psd::{PowerSpectrum, WelchEstimator};

use serde::{Deserialize, Serialize};

use crate::preprocess::ConditionedWindow;

pub const FEATURE_COUNT: usize = 14;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "energy_alpha",
    "energy_beta",
    "energy_theta",
    "energy_delta",
    "alpha_beta_ratio",
    "max_freq",
    "spectral_centroid",
    "spectral_slope",
    "mean",
    "variance",
    "rms",
    "zero_crossings",
    "hjorth_mobility",
    "hjorth_complexity",
];

/// EEG bands summed from the PSD, inclusive on both edges (Hz).
pub const ALPHA_BAND: (f64, f64) = (8.0, 12.0);
pub const BETA_BAND: (f64, f64) = (14.0, 30.0);
pub const THETA_BAND: (f64, f64) = (4.0, 7.0);
pub const DELTA_BAND: (f64, f64) = (0.5, 3.0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub energy_alpha: f64,
    pub energy_beta: f64,
    pub energy_theta: f64,
    pub energy_delta: f64,
    pub alpha_beta_ratio: f64,
    pub max_freq: f64,
    pub spectral_centroid: f64,
    pub spectral_slope: f64,
    pub mean: f64,
    pub variance: f64,
    pub rms: f64,
    pub zero_crossings: f64,
    pub hjorth_mobility: f64,
    pub hjorth_complexity: f64,
}

impl FeatureVector {
    /// Values in [`FEATURE_NAMES`] order.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.energy_alpha,
            self.energy_beta,
            self.energy_theta,
            self.energy_delta,
            self.alpha_beta_ratio,
            self.max_freq,
            self.spectral_centroid,
            self.spectral_slope,
            self.mean,
            self.variance,
            self.rms,
            self.zero_crossings,
            self.hjorth_mobility,
            self.hjorth_complexity,
        ]
    }

    pub fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        let [energy_alpha, energy_beta, energy_theta, energy_delta, alpha_beta_ratio, max_freq, spectral_centroid, spectral_slope, mean, variance, rms, zero_crossings, hjorth_mobility, hjorth_complexity] =
            values;
        Self {
            energy_alpha,
            energy_beta,
            energy_theta,
            energy_delta,
            alpha_beta_ratio,
            max_freq,
            spectral_centroid,
            spectral_slope,
            mean,
            variance,
            rms,
            zero_crossings,
            hjorth_mobility,
            hjorth_complexity,
        }
    }

    /// `(name, value)` pairs in contract order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> {
        FEATURE_NAMES.into_iter().zip(self.to_array())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.named().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PsdFeatures {
    pub energy_alpha: f64,
    pub energy_beta: f64,
    pub energy_theta: f64,
    pub energy_delta: f64,
    pub alpha_beta_ratio: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralFeatures {
    pub max_freq: f64,
    pub spectral_centroid: f64,
    pub spectral_slope: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemporalFeatures {
    pub mean: f64,
    pub variance: f64,
    pub rms: f64,
    pub zero_crossings: f64,
    pub hjorth_mobility: f64,
    pub hjorth_complexity: f64,
}

#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    sampling_rate: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(crate::config::FREQ as f64)
    }
}

impl FeatureExtractor {
    pub fn new(sampling_rate: f64) -> Self {
        Self { sampling_rate }
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Single full-length segment, i.e. one Hann-windowed periodogram.
    pub fn power_spectrum(&self, data: &[f64]) -> PowerSpectrum {
        WelchEstimator::with_segment_len(data.len()).compute(data, self.sampling_rate)
    }

    pub fn calculate_psd_features(&self, psd: &PowerSpectrum) -> PsdFeatures {
        let energy_alpha = psd.band_energy(ALPHA_BAND.0, ALPHA_BAND.1);
        let energy_beta = psd.band_energy(BETA_BAND.0, BETA_BAND.1);
        let alpha_beta_ratio = if energy_beta == 0.0 {
            0.0
        } else {
            energy_alpha / energy_beta
        };
        PsdFeatures {
            energy_alpha,
            energy_beta,
            energy_theta: psd.band_energy(THETA_BAND.0, THETA_BAND.1),
            energy_delta: psd.band_energy(DELTA_BAND.0, DELTA_BAND.1),
            alpha_beta_ratio,
        }
    }

    pub fn calculate_spectral_features(&self, psd: &PowerSpectrum) -> SpectralFeatures {
        // First maximum wins, like an argmax.
        let max_freq = psd
            .bins()
            .fold(None, |best: Option<(f64, f64)>, (f, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((f, p)),
            })
            .map_or(0.0, |(f, _)| f);
        let total = psd.total_power();
        let spectral_centroid = if total > 0.0 {
            psd.bins().map(|(f, p)| f * p).sum::<f64>() / total
        } else {
            0.0
        };
        // The DC bin has no log frequency; empty bins have no log power.
        let (log_f, log_p): (Vec<f64>, Vec<f64>) = psd
            .bins()
            .skip(1)
            .filter(|(f, p)| *f > 0.0 && *p > 0.0)
            .map(|(f, p)| (f.ln(), p.ln()))
            .unzip();
        SpectralFeatures {
            max_freq,
            spectral_centroid,
            spectral_slope: linear_fit_slope(&log_f, &log_p),
        }
    }

    pub fn calculate_temporal_features(&self, data: &[f64]) -> TemporalFeatures {
        let mean = mean_of(data);
        let variance = population_variance(data);
        let rms = if data.is_empty() {
            0.0
        } else {
            (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
        };
        let zero_crossings = data
            .windows(2)
            .filter(|pair| sign(pair[0]) != sign(pair[1]))
            .count() as f64;

        let first_diff = diff(data);
        let second_diff = diff(&first_diff);
        let std_signal = variance.sqrt();
        let std_first = population_variance(&first_diff).sqrt();
        let std_second = population_variance(&second_diff).sqrt();
        let hjorth_mobility = ratio(std_first, std_signal);
        let hjorth_complexity = ratio(ratio(std_second, std_first), hjorth_mobility);

        TemporalFeatures {
            mean,
            variance,
            rms,
            zero_crossings,
            hjorth_mobility,
            hjorth_complexity,
        }
    }

    pub fn calculate_features(&self, window: &ConditionedWindow) -> FeatureVector {
        self.calculate_features_from(window.values())
    }

    pub fn calculate_features_from(&self, data: &[f64]) -> FeatureVector {
        let psd = self.power_spectrum(data);
        let p = self.calculate_psd_features(&psd);
        let s = self.calculate_spectral_features(&psd);
        let t = self.calculate_temporal_features(data);
        FeatureVector {
            energy_alpha: p.energy_alpha,
            energy_beta: p.energy_beta,
            energy_theta: p.energy_theta,
            energy_delta: p.energy_delta,
            alpha_beta_ratio: p.alpha_beta_ratio,
            max_freq: s.max_freq,
            spectral_centroid: s.spectral_centroid,
            spectral_slope: s.spectral_slope,
            mean: t.mean,
            variance: t.variance,
            rms: t.rms,
            zero_crossings: t.zero_crossings,
            hjorth_mobility: t.hjorth_mobility,
            hjorth_complexity: t.hjorth_complexity,
        }
    }
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn diff(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| w[1] - w[0]).collect()
}

fn mean_of(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance.
fn population_variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean_of(data);
    data.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / data.len() as f64
}

/// `num / den`, or 0 when the denominator vanishes.
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Least-squares slope of `y` against `x`; 0 with fewer than two points.
fn linear_fit_slope(x: &[f64], y: &[f64]) -> f64 {
    if x.len() < 2 {
        return 0.0;
    }
    let mx = mean_of(x);
    let my = mean_of(y);
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - mx) * (yi - my);
        sxx += (xi - mx) * (xi - mx);
    }
    ratio(sxy, sxx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FREQ;
    use pretty_assertions::assert_eq;
    use std::f64::consts::PI;

    fn tone(freq_hz: f64, amplitude: f64) -> Vec<f64> {
        (0..FREQ)
            .map(|i| amplitude * (2.0 * PI * freq_hz * i as f64 / FREQ as f64).sin())
            .collect()
    }

    #[test]
    fn json_form_is_a_named_map_in_contract_order() {
        let fv = FeatureVector::from_array(std::array::from_fn(|i| i as f64));
        let json = serde_json::to_string(&fv).unwrap();
        let mut last = 0;
        for name in FEATURE_NAMES {
            let pos = json.find(&format!("\"{name}\"")).unwrap();
            assert!(pos >= last, "{name} out of order");
            last = pos;
        }
        let back: FeatureVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fv);
    }

    #[test]
    fn array_and_names_line_up() {
        let fv = FeatureVector::from_array(std::array::from_fn(|i| i as f64 * 10.0));
        assert_eq!(fv.to_array().len(), FEATURE_COUNT);
        assert_eq!(fv.get("energy_alpha"), Some(0.0));
        assert_eq!(fv.get("max_freq"), Some(50.0));
        assert_eq!(fv.get("hjorth_complexity"), Some(130.0));
        assert_eq!(fv.get("unknown"), None);
        assert_eq!(fv.hjorth_mobility, 120.0);
    }

    #[test]
    fn alpha_tone_dominates_alpha_band() {
        let fv = FeatureExtractor::default().calculate_features_from(&tone(10.0, 50.0));
        assert_eq!(fv.max_freq, 10.0);
        assert!(fv.energy_alpha > 100.0 * fv.energy_beta);
        assert!((fv.spectral_centroid - 10.0).abs() < 0.5);
        assert!(fv.mean.abs() < 1e-9);
        assert!((fv.variance - 1250.0).abs() < 1e-6);
        assert!((fv.rms - 1250f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn off_bin_alpha_tone_has_high_ratio() {
        let fv = FeatureExtractor::default().calculate_features_from(&tone(10.3, 50.0));
        assert_eq!(fv.max_freq, 10.0);
        assert!(fv.energy_beta > 0.0);
        assert!(fv.alpha_beta_ratio > 100.0);
    }

    #[test]
    fn beta_tone_has_low_ratio() {
        let fv = FeatureExtractor::default().calculate_features_from(&tone(20.0, 50.0));
        assert_eq!(fv.max_freq, 20.0);
        assert!(fv.alpha_beta_ratio < 0.01);
    }

    #[test]
    fn ratio_is_zero_when_beta_is_empty() {
        let extractor = FeatureExtractor::default();
        let psd = PowerSpectrum {
            frequencies_hz: (0..=256).map(f64::from).collect(),
            density: (0..=256).map(|f| if f == 10 { 4.0 } else { 0.0 }).collect(),
        };
        let p = extractor.calculate_psd_features(&psd);
        assert_eq!(p.energy_beta, 0.0);
        assert_eq!(p.energy_alpha, 4.0);
        assert_eq!(p.alpha_beta_ratio, 0.0);

        let flat = extractor.calculate_features_from(&vec![0.0; FREQ]);
        assert_eq!(flat.alpha_beta_ratio, 0.0);
        assert!(flat.to_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn zero_crossings_count_sign_changes() {
        let t = FeatureExtractor::default()
            .calculate_temporal_features(&[1.0, -1.0, -2.0, 3.0, 0.0, 4.0]);
        // +→-, -→+, +→0, 0→+
        assert_eq!(t.zero_crossings, 4.0);
    }

    #[test]
    fn hjorth_parameters_of_a_pure_tone() {
        let f = 8.0;
        let t = FeatureExtractor::default().calculate_temporal_features(&tone(f, 1.0));
        // Mobility of a sampled sinusoid is 2*sin(w/2).
        let w = 2.0 * PI * f / FREQ as f64;
        assert!((t.hjorth_mobility - 2.0 * (w / 2.0).sin()).abs() < 1e-3);
        assert!((t.hjorth_complexity - 1.0).abs() < 1e-2);
    }

    #[test]
    fn spectral_slope_of_power_law() {
        let extractor = FeatureExtractor::default();
        let psd = PowerSpectrum {
            frequencies_hz: (0..=64).map(f64::from).collect(),
            density: (0..=64)
                .map(|f| if f == 0 { 0.0 } else { (f as f64).powf(-2.0) })
                .collect(),
        };
        let s = extractor.calculate_spectral_features(&psd);
        assert!((s.spectral_slope + 2.0).abs() < 1e-9);
        assert_eq!(s.max_freq, 1.0);
    }

    #[test]
    fn conditioned_window_gives_fourteen_finite_features() {
        let window = ConditionedWindow::new(tone(12.0, 3.0)).unwrap();
        let fv = FeatureExtractor::default().calculate_features(&window);
        let values = fv.to_array();
        assert_eq!(values.len(), 14);
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
