pub mod detection;
pub mod engine;
pub mod history;

pub use detection::{DeltaClass, DetectionConfig, IntakeDetectionStrategy, ThresholdDetector};
pub use engine::{IntakeEngine, IntakeError, ScaleOutcome};
pub use history::{IntakeEntry, IntakeHistory, IntakeSource};
