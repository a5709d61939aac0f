use crate::types::{ConnectionState, IntakeSnapshot, Reading, TrackerState};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use log::{debug, info};

/// Latest published view of the tracker for the UI layer.
pub struct StateManager {
    state: Mutex<CriticalSectionRawMutex, TrackerState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub async fn apply_reading(&self, reading: &Reading) {
        let mut state = self.state.lock().await;
        match reading {
            Reading::Motion(vector) => state.motion = *vector,
            Reading::Rotation(vector) => state.rotation = *vector,
            Reading::Scale { volume_ml, unit } => {
                state.volume_label = if unit.is_empty() {
                    format!("{:.1}", volume_ml)
                } else {
                    format!("{:.1} {}", volume_ml, unit)
                };
            }
            Reading::Orientation(label) => {
                if state.orientation != *label {
                    debug!("Orientation changed: {} -> {}", state.orientation, label);
                    state.orientation = label.clone();
                }
            }
        }
    }

    pub async fn set_connection_state(&self, connection_state: ConnectionState) {
        let mut state = self.state.lock().await;
        if state.connection_state != connection_state {
            info!(
                "Connection state changed: {:?} -> {:?}",
                state.connection_state, connection_state
            );
            state.connection_state = connection_state;
            state.is_connected = connection_state == ConnectionState::Connected;
        }
    }

    pub async fn update_intake(&self, intake: IntakeSnapshot) {
        self.state.lock().await.intake = intake;
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.state.lock().await.last_error = error;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_connected
    }

    pub async fn get_full_state(&self) -> TrackerState {
        self.state.lock().await.clone()
    }
}
