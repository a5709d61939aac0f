use serde::{Deserialize, Serialize};

/// Raw three-axis sample as reported by the bottle. No filtering is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A decoded telemetry sample. Produced and consumed per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    Motion(Vector3),
    Rotation(Vector3),
    Scale { volume_ml: f64, unit: String },
    Orientation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
}

/// Read-only view of the intake engine, published after every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeSnapshot {
    pub total_intake_ml: f64,
    pub current_volume_ml: f64,
    pub refill_amount_ml: f64,
    pub is_refill_mode: bool,
}

impl IntakeSnapshot {
    /// Fill level of the bottle relative to the last refill, clamped to `[0, 1]`.
    pub fn fill_fraction(&self) -> f64 {
        (self.current_volume_ml / self.refill_amount_ml.max(1.0)).clamp(0.0, 1.0)
    }
}

/// Everything the UI layer needs to render the bottle panel.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerState {
    pub connection_state: ConnectionState,
    pub is_connected: bool,
    pub motion: Vector3,
    pub rotation: Vector3,
    pub orientation: String,
    pub volume_label: String,
    pub intake: IntakeSnapshot,
    pub last_error: Option<String>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Idle,
            is_connected: false,
            motion: Vector3::default(),
            rotation: Vector3::default(),
            orientation: "Not Upright".to_string(),
            volume_label: "0.0 mL".to_string(),
            intake: IntakeSnapshot::default(),
            last_error: None,
        }
    }
}

pub const CONSUMPTION_THRESHOLD_ML: f64 = 5.0; // smaller drops are scale jitter
pub const REFILL_THRESHOLD_ML: f64 = 100.0;
pub const ML_PER_GLASS: f64 = 240.0;
pub const GLASS_STEP: f64 = 0.5;
