use std::f64::consts::PI;

use crate::error::PreprocessError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Filter state that makes a constant input `level` pass without a transient.
    fn steady_state(&self, level: f64) -> BiquadState {
        let y = self.dc_gain() * level;
        BiquadState {
            z1: y - self.b0 * level,
            z2: self.b2 * level - self.a2 * y,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    fn process(&mut self, c: &BiquadCoeffs, input: f64) -> f64 {
        // Transposed direct form II
        let y = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * y + self.z2;
        self.z2 = c.b2 * input - c.a2 * y;
        y
    }
}

/// Cascade of second-order sections applied forward and backward.
#[derive(Clone, Debug)]
pub struct SosFilter {
    sections: Vec<BiquadCoeffs>,
    order: usize,
}

impl SosFilter {
    /// Narrow band-stop at `freq_hz`.
    pub fn notch(freq_hz: f64, q: f64, sample_rate_hz: f64) -> Result<Self, PreprocessError> {
        let nyquist = check_rate(sample_rate_hz)?;
        if !(freq_hz > 0.0 && freq_hz < nyquist) || q <= 0.0 {
            return Err(PreprocessError::InvalidBand {
                low_hz: freq_hz,
                high_hz: freq_hz,
                sample_rate_hz,
            });
        }
        Ok(Self {
            sections: vec![notch(freq_hz, sample_rate_hz, q)],
            order: 2,
        })
    }

    /// Butterworth band-pass: an `order` high-pass at `low_hz` followed by an
    /// `order` low-pass at `high_hz`, i.e. `2 * order` poles in total.
    pub fn butter_bandpass(
        order: usize,
        low_hz: f64,
        high_hz: f64,
        sample_rate_hz: f64,
    ) -> Result<Self, PreprocessError> {
        let nyquist = check_rate(sample_rate_hz)?;
        if order == 0 || !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
            return Err(PreprocessError::InvalidBand {
                low_hz,
                high_hz,
                sample_rate_hz,
            });
        }
        let mut sections = butterworth_sections(order, low_hz, sample_rate_hz, Edge::High);
        sections.extend(butterworth_sections(
            order,
            high_hz,
            sample_rate_hz,
            Edge::Low,
        ));
        Ok(Self {
            sections,
            order: 2 * order,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Edge padding used by [`SosFilter::filtfilt`]; inputs must be longer.
    pub fn settle_len(&self) -> usize {
        3 * (self.order + 1)
    }

    /// Single causal pass, starting from the steady state for `signal[0]`.
    pub fn lfilter(&self, signal: &[f64]) -> Vec<f64> {
        let Some(&first) = signal.first() else {
            return Vec::new();
        };
        let mut level = first;
        let mut states: Vec<BiquadState> = self
            .sections
            .iter()
            .map(|c| {
                let state = c.steady_state(level);
                level *= c.dc_gain();
                state
            })
            .collect();
        signal
            .iter()
            .map(|&x| {
                let mut value = x;
                for (state, coeffs) in states.iter_mut().zip(&self.sections) {
                    value = state.process(coeffs, value);
                }
                value
            })
            .collect()
    }

    /// Zero-phase filtering: odd-reflect both edges, run forward, run
    /// backward, then trim the padding.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>, PreprocessError> {
        let pad = self.settle_len();
        let n = signal.len();
        if n <= pad {
            return Err(PreprocessError::WindowTooShort {
                len: n,
                settle: pad,
            });
        }
        let first = signal[0];
        let last = signal[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut forward = self.lfilter(&extended);
        forward.reverse();
        let mut backward = self.lfilter(&forward);
        backward.reverse();
        Ok(backward[pad..pad + n].to_vec())
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Low,
    High,
}

fn check_rate(sample_rate_hz: f64) -> Result<f64, PreprocessError> {
    if sample_rate_hz > 0.0 && sample_rate_hz.is_finite() {
        Ok(sample_rate_hz * 0.5)
    } else {
        Err(PreprocessError::InvalidSampleRate)
    }
}

/// Butterworth of `order` at `cutoff_hz`: one biquad per conjugate pole pair,
/// plus a first-order section when the order is odd.
fn butterworth_sections(
    order: usize,
    cutoff_hz: f64,
    sample_rate_hz: f64,
    edge: Edge,
) -> Vec<BiquadCoeffs> {
    let mut sections = Vec::with_capacity(order / 2 + 1);
    for k in 0..order / 2 {
        let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
        let q = 1.0 / (2.0 * theta.cos());
        sections.push(match edge {
            Edge::Low => lowpass(cutoff_hz, sample_rate_hz, q),
            Edge::High => highpass(cutoff_hz, sample_rate_hz, q),
        });
    }
    if order % 2 == 1 {
        sections.push(first_order(cutoff_hz, sample_rate_hz, edge));
    }
    sections
}

fn first_order(freq_hz: f64, sample_rate_hz: f64, edge: Edge) -> BiquadCoeffs {
    let k = (PI * freq_hz / sample_rate_hz).tan();
    let norm = 1.0 / (1.0 + k);
    let (b0, b1) = match edge {
        Edge::Low => (k * norm, k * norm),
        Edge::High => (norm, -norm),
    };
    BiquadCoeffs {
        b0,
        b1,
        b2: 0.0,
        a1: (k - 1.0) * norm,
        a2: 0.0,
    }
}

fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn notch(center_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * center_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = 1.0;
    let b1 = -2.0 * cos_w0;
    let b2 = 1.0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
