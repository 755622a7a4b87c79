use rustfft::{num_complex::Complex64, FftPlanner};
use std::f64::consts::PI;

/// One-sided power spectral density.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub frequencies_hz: Vec<f64>,
    /// Power per Hz for each entry of `frequencies_hz`.
    pub density: Vec<f64>,
}

impl PowerSpectrum {
    /// Sum of the density over bins with `low_hz <= f <= high_hz`.
    pub fn band_energy(&self, low_hz: f64, high_hz: f64) -> f64 {
        self.bins()
            .filter(|(f, _)| *f >= low_hz && *f <= high_hz)
            .map(|(_, p)| p)
            .sum()
    }

    pub fn bins(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies_hz
            .iter()
            .copied()
            .zip(self.density.iter().copied())
    }

    pub fn total_power(&self) -> f64 {
        self.density.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.density.len()
    }

    pub fn is_empty(&self) -> bool {
        self.density.is_empty()
    }
}

/// Welch's averaged periodogram with a periodic Hann window, per-segment
/// mean removal, 50% overlap and density scaling.
pub struct WelchEstimator {
    segment_len: usize,
}

impl WelchEstimator {
    pub fn with_segment_len(segment_len: usize) -> Self {
        Self { segment_len }
    }

    pub fn compute(&self, signal: &[f64], sample_rate_hz: f64) -> PowerSpectrum {
        let nperseg = self.segment_len.min(signal.len());
        if nperseg == 0 || sample_rate_hz <= 0.0 {
            return PowerSpectrum {
                frequencies_hz: Vec::new(),
                density: Vec::new(),
            };
        }
        let step = (nperseg - nperseg / 2).max(1);
        let window: Vec<f64> = (0..nperseg)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / nperseg as f64).cos())
            .collect();
        let scale = 1.0 / (sample_rate_hz * window.iter().map(|w| w * w).sum::<f64>());
        let n_bins = nperseg / 2 + 1;

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(nperseg);
        let mut density = vec![0.0; n_bins];
        let mut segments = 0usize;
        let mut start = 0;
        while start + nperseg <= signal.len() {
            let segment = &signal[start..start + nperseg];
            let mean = segment.iter().sum::<f64>() / nperseg as f64;
            let mut buffer: Vec<Complex64> = segment
                .iter()
                .zip(&window)
                .map(|(x, w)| Complex64::new((x - mean) * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            for (acc, c) in density.iter_mut().zip(&buffer) {
                *acc += c.norm_sqr() * scale;
            }
            segments += 1;
            start += step;
        }
        let last_doubled = if nperseg % 2 == 0 { n_bins - 1 } else { n_bins };
        for (k, p) in density.iter_mut().enumerate() {
            *p /= segments as f64;
            if k > 0 && k < last_doubled {
                *p *= 2.0;
            }
        }
        let frequencies_hz = (0..n_bins)
            .map(|k| k as f64 * sample_rate_hz / nperseg as f64)
            .collect();
        PowerSpectrum {
            frequencies_hz,
            density,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f64, fs: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn bins_cover_dc_to_nyquist() {
        let psd = WelchEstimator::with_segment_len(512).compute(&vec![0.0; 512], 512.0);
        assert_eq!(psd.len(), 257);
        assert_eq!(psd.frequencies_hz[0], 0.0);
        assert_eq!(psd.frequencies_hz[10], 10.0);
        assert_eq!(psd.frequencies_hz[256], 256.0);
        assert_eq!(psd.total_power(), 0.0);
    }

    #[test]
    fn sine_power_lands_on_its_bin_and_integrates_to_variance() {
        let signal = sine(12.0, 512.0, 512);
        let psd = WelchEstimator::with_segment_len(512).compute(&signal, 512.0);
        let peak = psd
            .bins()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(f, _)| f)
            .unwrap();
        assert_eq!(peak, 12.0);
        // Density summed over 1 Hz bins equals the mean power (0.5).
        assert!((psd.total_power() - 0.5).abs() < 1e-6);
        assert!(psd.band_energy(11.0, 13.0) > 0.49);
    }

    #[test]
    fn overlapping_segments_average() {
        let signal = sine(32.0, 256.0, 1024);
        let psd = WelchEstimator::with_segment_len(256).compute(&signal, 256.0);
        assert_eq!(psd.len(), 129);
        assert!((psd.total_power() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn constant_offset_is_removed() {
        let signal: Vec<f64> = sine(8.0, 512.0, 512).iter().map(|v| v + 100.0).collect();
        let psd = WelchEstimator::with_segment_len(512).compute(&signal, 512.0);
        assert!(psd.density[0] < 1e-12);
    }
}
