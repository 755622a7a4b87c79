// src/pipeline.rs
use crate::config::PreprocessConfig;
use crate::error::{PreprocessError, TickError};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::preprocess::Preprocessor;
use crate::sensor::{SampleWindow, SensorLink};

/// One-second chain from raw window to feature vector.
#[derive(Clone, Debug)]
pub struct SignalPipeline {
    preprocessor: Preprocessor,
    extractor: FeatureExtractor,
}

impl SignalPipeline {
    pub fn new(config: &PreprocessConfig) -> Result<Self, PreprocessError> {
        Ok(Self {
            preprocessor: Preprocessor::new(config.clone())?,
            extractor: FeatureExtractor::new(config.sampling_rate),
        })
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn process(&self, window: &SampleWindow) -> Result<FeatureVector, PreprocessError> {
        let conditioned = self.preprocessor.preprocess(window)?;
        Ok(self.extractor.calculate_features(&conditioned))
    }

    /// Reads one window from `sensor` and reduces it.
    pub fn pump_once<S: SensorLink + ?Sized>(
        &self,
        sensor: &mut S,
    ) -> Result<FeatureVector, TickError> {
        let window = sensor.read_one_second_data()?;
        Ok(self.process(&window)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FREQ;
    use crate::error::SensorError;
    use crate::sensor::{ReplaySensor, SimulatedSensor};
    use crate::types::Label;

    #[test]
    fn pipeline_reduces_a_simulated_window() {
        let pipeline = SignalPipeline::new(&PreprocessConfig::default()).unwrap();
        let mut sensor = SimulatedSensor::new(Label::Relaxing, 3);
        sensor.connect().unwrap();
        sensor.start_reading();
        let features = pipeline.pump_once(&mut sensor).unwrap();
        assert!(features.to_array().iter().all(|v| v.is_finite()));
        assert!(features.energy_alpha > features.energy_beta);
    }

    #[test]
    fn short_and_empty_windows_are_recoverable() {
        let pipeline = SignalPipeline::new(&PreprocessConfig::default()).unwrap();
        let mut sensor = ReplaySensor::new(vec![vec![100; FREQ / 2], vec![0; FREQ]]);
        sensor.connect().unwrap();
        let short = pipeline.pump_once(&mut sensor).unwrap_err();
        assert!(matches!(
            short,
            TickError::Sensor(SensorError::IncompleteWindow { .. })
        ));
        assert!(short.is_recoverable());
        let missing = pipeline.pump_once(&mut sensor).unwrap_err();
        assert!(matches!(
            missing,
            TickError::Preprocess(PreprocessError::AllMissing)
        ));
        assert!(missing.is_recoverable());
    }

    #[test]
    fn disconnected_sensor_is_fatal() {
        let pipeline = SignalPipeline::new(&PreprocessConfig::default()).unwrap();
        let mut sensor = ReplaySensor::new(Vec::<Vec<i32>>::new());
        let err = pipeline.pump_once(&mut sensor).unwrap_err();
        assert!(!err.is_recoverable());
    }
}
