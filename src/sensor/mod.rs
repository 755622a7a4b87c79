// src/sensor/mod.rs
//! Sensor link: owns the device connection and yields one-second sample windows.

pub mod replay;
pub mod serial;
pub mod simulated;

pub use replay::{CommandLog, ReplaySensor};
pub use serial::{list_ports, SerialSensor};
pub use simulated::SimulatedSensor;

use crate::config::FREQ;
use crate::error::SensorError;

pub type ConnectResult = Result<(), SensorError>;
pub type WindowResult = Result<SampleWindow, SensorError>;

/// Exactly [`FREQ`] raw ADC codes covering one second.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleWindow {
    samples: Vec<i32>,
}

impl SampleWindow {
    /// Accepts only complete windows; anything shorter or longer is rejected.
    pub fn new(samples: Vec<i32>) -> WindowResult {
        if samples.len() != FREQ {
            return Err(SensorError::IncompleteWindow {
                got: samples.len(),
                expected: FREQ,
            });
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_inner(self) -> Vec<i32> {
        self.samples
    }
}

/// Device wire commands.
pub const START_COMMAND: &str = "start_reading";
pub const STOP_COMMAND: &str = "stop_reading";

/// Anything that can act as the EEG sensor for a session worker.
pub trait SensorLink: Send {
    /// Opens the link. A second call while open fails fast.
    fn connect(&mut self) -> ConnectResult;
    fn is_connected(&self) -> bool;
    /// Sends `start_reading`; `false` when the link is not open.
    fn start_reading(&mut self) -> bool;
    /// Sends `stop_reading`; `false` when the link is not open.
    fn stop_reading(&mut self) -> bool;
    /// Blocks for roughly one second and returns a complete window or an error.
    fn read_one_second_data(&mut self) -> WindowResult;
    /// Safe to call repeatedly and when never connected.
    fn disconnect(&mut self);
}

impl<S: SensorLink + ?Sized> SensorLink for Box<S> {
    fn connect(&mut self) -> ConnectResult {
        (**self).connect()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn start_reading(&mut self) -> bool {
        (**self).start_reading()
    }
    fn stop_reading(&mut self) -> bool {
        (**self).stop_reading()
    }
    fn read_one_second_data(&mut self) -> WindowResult {
        (**self).read_one_second_data()
    }
    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}
