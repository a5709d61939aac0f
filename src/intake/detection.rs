//! Intake event detection strategies
//! Classifies the change between consecutive scale readings

use crate::types::{CONSUMPTION_THRESHOLD_ML, REFILL_THRESHOLD_ML};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Debounce thresholds for volume deltas (millilitres)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Drops at or below this magnitude are scale jitter
    pub consumption_threshold_ml: f64,
    /// Rises above this are treated as a refill
    pub refill_threshold_ml: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            consumption_threshold_ml: CONSUMPTION_THRESHOLD_ML,
            refill_threshold_ml: REFILL_THRESHOLD_ML,
        }
    }
}

/// Result of classifying one volume delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaClass {
    Consumption { amount_ml: f64 },
    RefillCandidate { added_ml: f64 },
    Noise,
}

/// Strategy trait for classifying volume changes
pub trait IntakeDetectionStrategy {
    fn classify(&mut self, previous_ml: f64, current_ml: f64) -> DeltaClass;

    fn reset(&mut self) {}
}

/// Fixed-threshold detector. Stateless between readings.
#[derive(Debug, Clone, Default)]
pub struct ThresholdDetector {
    config: DetectionConfig,
}

impl ThresholdDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }
}

impl IntakeDetectionStrategy for ThresholdDetector {
    fn classify(&mut self, previous_ml: f64, current_ml: f64) -> DeltaClass {
        let delta = current_ml - previous_ml;

        if delta < -self.config.consumption_threshold_ml {
            info!("💧 Consumption detected: {:.1} mL -> {:.1} mL (Δ{:.1} mL)", previous_ml, current_ml, delta);
            DeltaClass::Consumption { amount_ml: -delta }
        } else if delta > self.config.refill_threshold_ml {
            info!("🚰 Refill detected: {:.1} mL -> {:.1} mL (Δ{:.1} mL)", previous_ml, current_ml, delta);
            DeltaClass::RefillCandidate { added_ml: delta }
        } else {
            debug!("Volume change within noise band: Δ{:.1} mL", delta);
            DeltaClass::Noise
        }
    }
}
