// src/sensor/simulated.rs
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread;
use std::time::Duration;

use super::{ConnectResult, SampleWindow, SensorLink, WindowResult};
use crate::config::{DEVICE_MAX_CODE, FREQ};
use crate::error::SensorError;
use crate::types::Label;

const BASELINE: f64 = 2048.0;
const GLITCH_RATE: f64 = 0.002;

/// Synthetic single-channel EEG so the pipeline runs without hardware.
///
/// Relaxing produces a dominant 10 Hz alpha rhythm, Focused a dominant 20 Hz
/// beta rhythm. A small fraction of codes are dropped (0) or saturated.
pub struct SimulatedSensor {
    state: Label,
    rng: StdRng,
    pace: Duration,
    sample_index: u64,
    connected: bool,
    streaming: bool,
}

impl SimulatedSensor {
    pub fn new(state: Label, seed: u64) -> Self {
        Self {
            state,
            rng: StdRng::seed_from_u64(seed),
            pace: Duration::ZERO,
            sample_index: 0,
            connected: false,
            streaming: false,
        }
    }

    /// Hold each read for `pace`, e.g. one second for wall-clock playback.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn set_state(&mut self, state: Label) {
        self.state = state;
    }

    /// Produce the next window without any link bookkeeping.
    pub fn generate_window(&mut self) -> Vec<i32> {
        let (dominant_hz, background_hz) = match self.state {
            Label::Relaxing => (10.0, 20.0),
            Label::Focused => (20.0, 10.0),
        };
        let phase_jitter: f64 = self.rng.gen_range(0.0..2.0 * PI);
        let mut window = Vec::with_capacity(FREQ);
        for _ in 0..FREQ {
            let t = self.sample_index as f64 / FREQ as f64;
            self.sample_index += 1;
            let noise: f64 = self.rng.gen_range(-40.0..40.0);
            let value = BASELINE
                + 300.0 * (2.0 * PI * dominant_hz * t + phase_jitter).sin()
                + 60.0 * (2.0 * PI * background_hz * t).sin()
                + 80.0 * (2.0 * PI * 2.0 * t).sin()
                + noise;
            let code = if self.rng.gen_bool(GLITCH_RATE) {
                if self.rng.gen_bool(0.5) {
                    0
                } else {
                    DEVICE_MAX_CODE + 100
                }
            } else {
                value.round().clamp(1.0, DEVICE_MAX_CODE as f64) as i32
            };
            window.push(code);
        }
        window
    }
}

impl SensorLink for SimulatedSensor {
    fn connect(&mut self) -> ConnectResult {
        if self.connected {
            return Err(SensorError::PortBusy("simulated".into()));
        }
        self.connected = true;
        info!("simulated sensor connected ({} rhythm)", self.state);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn start_reading(&mut self) -> bool {
        self.streaming = self.connected;
        self.connected
    }

    fn stop_reading(&mut self) -> bool {
        self.streaming = false;
        self.connected
    }

    fn read_one_second_data(&mut self) -> WindowResult {
        if !self.connected {
            return Err(SensorError::NotConnected);
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        if !self.streaming {
            return Err(SensorError::IncompleteWindow {
                got: 0,
                expected: FREQ,
            });
        }
        SampleWindow::new(self.generate_window())
    }

    fn disconnect(&mut self) {
        self.streaming = false;
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_full_length_and_mostly_in_range() {
        let mut sensor = SimulatedSensor::new(Label::Focused, 1);
        sensor.connect().unwrap();
        assert!(sensor.start_reading());
        let window = sensor.read_one_second_data().unwrap();
        assert_eq!(window.len(), FREQ);
        let valid = window
            .samples()
            .iter()
            .filter(|v| **v > 0 && **v <= DEVICE_MAX_CODE)
            .count();
        assert!(valid > FREQ * 9 / 10);
    }

    #[test]
    fn no_data_before_start_reading() {
        let mut sensor = SimulatedSensor::new(Label::Relaxing, 1);
        sensor.connect().unwrap();
        assert!(sensor.read_one_second_data().is_err());
    }

    #[test]
    fn same_seed_same_signal() {
        let mut a = SimulatedSensor::new(Label::Relaxing, 9);
        let mut b = SimulatedSensor::new(Label::Relaxing, 9);
        assert_eq!(a.generate_window(), b.generate_window());
    }
}
