//! Application configuration

use crate::intake::detection::DetectionConfig;
use crate::types::ML_PER_GLASS;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Validation(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Inputs to the daily goal formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthProfile {
    pub weight_kg: f64,
    pub exercise_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub ml_per_glass: f64,
    /// Location of the intake snapshot document
    pub store_path: PathBuf,
    /// Entries kept for the "recent intake" list
    pub recent_entries: usize,
    pub profile: Option<HealthProfile>,
    /// Goal override for today only
    pub daily_goal_ml: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            ml_per_glass: ML_PER_GLASS,
            store_path: PathBuf::from("sipwise-intake.json"),
            recent_entries: 10,
            profile: None,
            daily_goal_ml: None,
        }
    }
}

impl AppConfig {
    /// Missing file means defaults; a present but malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {} - using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!("{} must be positive, got {}", name, value)))
            }
        };

        positive("consumption_threshold_ml", self.detection.consumption_threshold_ml)?;
        positive("refill_threshold_ml", self.detection.refill_threshold_ml)?;
        positive("ml_per_glass", self.ml_per_glass)?;
        if let Some(profile) = &self.profile {
            if !(profile.weight_kg.is_finite() && profile.weight_kg >= 0.0)
                || !(profile.exercise_min.is_finite() && profile.exercise_min >= 0.0)
            {
                return Err(ConfigError::Validation(format!("invalid health profile {:?}", profile)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"detection": {"consumption_threshold_ml": 8.0}, "ml_per_glass": 250.0}"#)
                .unwrap();
        assert_eq!(config.detection.consumption_threshold_ml, 8.0);
        assert_eq!(config.detection.refill_threshold_ml, 100.0);
        assert_eq!(config.ml_per_glass, 250.0);
        assert_eq!(config.recent_entries, 10);
        assert_eq!(config.profile, None);
    }

    #[test]
    fn test_health_profile_is_validated() {
        let config: AppConfig =
            serde_json::from_str(r#"{"profile": {"weight_kg": -70.0, "exercise_min": 30.0}}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join(format!("sipwise-missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let path = std::env::temp_dir().join(format!("sipwise-config-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{"ml_per_glass": 0}"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Validation(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
        fs::remove_file(&path).unwrap();
    }
}
