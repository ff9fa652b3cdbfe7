//! Hazard-detection boundary.

use crate::types::SensorVector;
use serde::{Deserialize, Serialize};

/// Turns a sensor sample into an anomaly verdict.
pub trait HazardDetector {
    /// Returns `(is_anomaly, intensity)` with intensity in `[0, 1]`.
    fn detect_anomaly(&self, sample: &SensorVector) -> (bool, f64);
}

/// Fixed thresholds and weights for the threshold detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub temperature_threshold: f64,
    pub radiation_threshold: f64,
    pub meteorite_threshold: f64,
    pub flooding_threshold: f64,

    /// Temperature at which the temperature channel saturates
    pub temperature_ceiling: f64,

    pub temperature_weight: f64,
    pub radiation_weight: f64,
    pub meteorite_weight: f64,
    pub flooding_weight: f64,

    /// Intensity above which a sample is anomalous
    pub alarm_level: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            temperature_threshold: 30.0,
            radiation_threshold: 0.4,
            meteorite_threshold: 0.3,
            flooding_threshold: 0.4,
            temperature_ceiling: 50.0,
            temperature_weight: 0.3,
            radiation_weight: 0.3,
            meteorite_weight: 0.2,
            flooding_weight: 0.2,
            alarm_level: 0.5,
        }
    }
}

/// Weighted-deficit threshold detector.
///
/// Each channel above its threshold contributes
/// `weight * (value - threshold) / (ceiling - threshold)`; the sum is capped
/// at 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdDetector {
    config: DetectorConfig,
}

impl ThresholdDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn channel(value: f64, threshold: f64, ceiling: f64, weight: f64) -> f64 {
        if value > threshold {
            weight * (value - threshold) / (ceiling - threshold)
        } else {
            0.0
        }
    }
}

impl HazardDetector for ThresholdDetector {
    fn detect_anomaly(&self, sample: &SensorVector) -> (bool, f64) {
        let c = &self.config;
        let score = Self::channel(
            sample.temperature,
            c.temperature_threshold,
            c.temperature_ceiling,
            c.temperature_weight,
        ) + Self::channel(sample.radiation, c.radiation_threshold, 1.0, c.radiation_weight)
            + Self::channel(sample.meteorites, c.meteorite_threshold, 1.0, c.meteorite_weight)
            + Self::channel(sample.flooding, c.flooding_threshold, 1.0, c.flooding_weight);

        let intensity = score.min(1.0);
        (intensity > c.alarm_level, intensity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_baseline_is_quiet() {
        let detector = ThresholdDetector::default();
        let (alarm, intensity) = detector.detect_anomaly(&SensorVector::BASELINE);
        assert!(!alarm);
        assert_eq!(intensity, 0.0);
    }

    #[test]
    fn test_weighted_deficit_score() {
        let detector = ThresholdDetector::default();
        let sample = SensorVector {
            temperature: 40.0, // 0.3 * 10/20 = 0.15
            radiation: 1.0,    // 0.3 * 0.6/0.6 = 0.3
            meteorites: 0.1,
            flooding: 0.7, // 0.2 * 0.3/0.6 = 0.1
        };
        let (alarm, intensity) = detector.detect_anomaly(&sample);
        assert_relative_eq!(intensity, 0.55, epsilon = 1e-12);
        assert!(alarm);
    }

    #[test]
    fn test_intensity_is_capped() {
        let detector = ThresholdDetector::default();
        let sample = SensorVector {
            temperature: 100.0,
            radiation: 100.0,
            meteorites: 100.0,
            flooding: 100.0,
        };
        let (alarm, intensity) = detector.detect_anomaly(&sample);
        assert!(alarm);
        assert_eq!(intensity, 1.0);
    }
}
