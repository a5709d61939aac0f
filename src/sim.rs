//! Simulated bottle
//!
//! A [`BleTransport`] that behaves like a single well-mannered bottle: every request is
//! answered immediately through the peripheral event channel. Used by the replay binary to
//! push a recorded telemetry capture through the full stack.

use crate::ble::{
    BleError, BleTransport, DiscoveredPeripheral, PeripheralEvent, PeripheralEventChannel, PeripheralId,
};
use crate::protocol::TelemetryChannel;
use crate::system::events::UserCommand;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const SIMULATED_BOTTLE_NAME: &str = "SmartBottle (simulated)";

pub struct SimulatedBottle {
    id: PeripheralId,
    events: Arc<PeripheralEventChannel>,
    powered: AtomicBool,
    connected: AtomicBool,
}

impl SimulatedBottle {
    pub fn new(events: Arc<PeripheralEventChannel>) -> Self {
        Self {
            id: PeripheralId("sim-bottle-0001".to_string()),
            events,
            powered: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn power_on(&self) {
        self.powered.store(true, Ordering::Relaxed);
        self.emit(PeripheralEvent::AdapterStateChanged { powered_on: true });
    }

    /// Push a notification as if the bottle had sent it. Dropped while not connected.
    pub fn notify(&self, channel: TelemetryChannel, payload: &[u8]) {
        if !self.is_connected() {
            debug!("Simulated bottle not connected - dropping {:?} frame", channel);
            return;
        }
        self.emit(PeripheralEvent::CharacteristicUpdated {
            characteristic: channel.uuid(),
            value: payload.to_vec(),
        });
    }

    /// Lose the link without either side asking for it.
    pub fn drop_link(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.emit(PeripheralEvent::Disconnected {
                id: self.id.clone(),
                reason: Some("simulated link loss".to_string()),
            });
        }
    }

    fn emit(&self, event: PeripheralEvent) {
        if self.events.try_send(event).is_err() {
            warn!("Peripheral event channel full - simulated event dropped");
        }
    }

    fn check_id(&self, id: &PeripheralId) -> Result<(), BleError> {
        if *id == self.id {
            Ok(())
        } else {
            Err(BleError::RequestFailed(format!("unknown peripheral {}", id)))
        }
    }

    fn check_powered(&self) -> Result<(), BleError> {
        if self.powered.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BleError::AdapterUnavailable)
        }
    }
}

impl BleTransport for SimulatedBottle {
    fn start_scan(&self, _service: Uuid, _allow_duplicates: bool) -> Result<(), BleError> {
        self.check_powered()?;
        self.emit(PeripheralEvent::Discovered(DiscoveredPeripheral {
            id: self.id.clone(),
            name: Some(SIMULATED_BOTTLE_NAME.to_string()),
            rssi: -48,
        }));
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), BleError> {
        Ok(())
    }

    fn connect(&self, id: &PeripheralId) -> Result<(), BleError> {
        self.check_powered()?;
        self.check_id(id)?;
        self.connected.store(true, Ordering::Relaxed);
        self.emit(PeripheralEvent::Connected(id.clone()));
        Ok(())
    }

    fn cancel_connection(&self, id: &PeripheralId) -> Result<(), BleError> {
        self.check_id(id)?;
        if self.connected.swap(false, Ordering::Relaxed) {
            self.emit(PeripheralEvent::Disconnected {
                id: id.clone(),
                reason: None,
            });
        }
        Ok(())
    }

    fn discover_characteristics(
        &self,
        id: &PeripheralId,
        _service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), BleError> {
        self.check_id(id)?;
        if !self.is_connected() {
            return Err(BleError::NotConnected);
        }
        self.emit(PeripheralEvent::CharacteristicsDiscovered {
            id: id.clone(),
            characteristics: characteristics.to_vec(),
        });
        Ok(())
    }

    fn subscribe(&self, id: &PeripheralId, _characteristic: Uuid) -> Result<(), BleError> {
        self.check_id(id)?;
        if self.is_connected() {
            Ok(())
        } else {
            Err(BleError::NotConnected)
        }
    }

    fn write_with_response(&self, id: &PeripheralId, characteristic: Uuid, value: &[u8]) -> Result<(), BleError> {
        self.check_id(id)?;
        if !self.is_connected() {
            return Err(BleError::NotConnected);
        }
        debug!("Simulated bottle received command {:02X?}", value);
        self.emit(PeripheralEvent::WriteCompleted {
            characteristic,
            result: Ok(()),
        });
        Ok(())
    }
}

/// One line of a telemetry capture.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep {
    Notify(TelemetryChannel, Vec<u8>),
    DropLink,
    Command(UserCommand),
    WaitMs(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ReplayParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ReplayParseError {}

fn parse_amount(argument: &str, line: usize) -> Result<f64, ReplayParseError> {
    argument.trim().parse::<f64>().map_err(|_| ReplayParseError {
        line,
        message: format!("expected a number, found {:?}", argument),
    })
}

/// Parse a `<channel> <payload>` line. Blank lines and `#` comments yield `None`.
pub fn parse_replay_line(text: &str, line: usize) -> Result<Option<ReplayStep>, ReplayParseError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let (keyword, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let rest = rest.trim();

    let step = match keyword {
        "accel" => ReplayStep::Notify(TelemetryChannel::Accelerometer, rest.as_bytes().to_vec()),
        "gyro" => ReplayStep::Notify(TelemetryChannel::Gyroscope, rest.as_bytes().to_vec()),
        "scale" => ReplayStep::Notify(TelemetryChannel::Scale, rest.as_bytes().to_vec()),
        "orientation" => ReplayStep::Notify(TelemetryChannel::Orientation, rest.as_bytes().to_vec()),
        "disconnect" => ReplayStep::DropLink,
        "wait" => ReplayStep::WaitMs(parse_amount(rest, line)? as u64),
        "manual" => ReplayStep::Command(UserCommand::AddManual(parse_amount(rest, line)?)),
        "glasses" => ReplayStep::Command(UserCommand::AddGlasses(parse_amount(rest, line)?)),
        "refill" => ReplayStep::Command(UserCommand::ToggleRefill),
        "confirm-refill" => ReplayStep::Command(UserCommand::ConfirmRefill),
        "calibrate" => ReplayStep::Command(UserCommand::Calibrate),
        "calculate" => ReplayStep::Command(UserCommand::Calculate),
        "reset" => ReplayStep::Command(UserCommand::ResetDaily),
        "foreground" => ReplayStep::Command(UserCommand::EnterForeground),
        "background" => ReplayStep::Command(UserCommand::EnterBackground),
        other => {
            return Err(ReplayParseError {
                line,
                message: format!("unknown channel {:?}", other),
            })
        }
    };

    Ok(Some(step))
}

pub fn parse_replay(capture: &str) -> Result<Vec<ReplayStep>, ReplayParseError> {
    let mut steps = Vec::new();
    for (index, text) in capture.lines().enumerate() {
        if let Some(step) = parse_replay_line(text, index + 1)? {
            steps.push(step);
        }
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::channel::Channel;

    fn drain(channel: &PeripheralEventChannel) -> Vec<PeripheralEvent> {
        std::iter::from_fn(|| channel.try_receive().ok()).collect()
    }

    #[test]
    fn test_simulated_connection_flow() {
        let channel = Arc::new(Channel::new());
        let bottle = SimulatedBottle::new(Arc::clone(&channel));

        assert_eq!(
            bottle.start_scan(Uuid::nil(), true),
            Err(BleError::AdapterUnavailable)
        );

        bottle.power_on();
        bottle.start_scan(Uuid::nil(), true).unwrap();
        bottle.connect(bottle.id()).unwrap();

        let events = drain(&channel);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], PeripheralEvent::Discovered(_)));
        assert_eq!(events[2], PeripheralEvent::Connected(bottle.id().clone()));

        bottle.notify(TelemetryChannel::Scale, b"300 mL");
        bottle.drop_link();
        bottle.notify(TelemetryChannel::Scale, b"250 mL");

        let events = drain(&channel);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], PeripheralEvent::Disconnected { .. }));
    }

    #[test]
    fn test_writes_require_connection() {
        let channel = Arc::new(Channel::new());
        let bottle = SimulatedBottle::new(channel);
        assert_eq!(
            bottle.write_with_response(bottle.id(), Uuid::nil(), &[3]),
            Err(BleError::NotConnected)
        );
    }

    #[test]
    fn test_capture_parsing() {
        let capture = "# morning\nscale 500.0 mL\n\naccel 0.1,0.2,9.8\nwait 250\nglasses 1.5\nrefill\ndisconnect\n";
        let steps = parse_replay(capture).unwrap();

        assert_eq!(
            steps,
            vec![
                ReplayStep::Notify(TelemetryChannel::Scale, b"500.0 mL".to_vec()),
                ReplayStep::Notify(TelemetryChannel::Accelerometer, b"0.1,0.2,9.8".to_vec()),
                ReplayStep::WaitMs(250),
                ReplayStep::Command(UserCommand::AddGlasses(1.5)),
                ReplayStep::Command(UserCommand::ToggleRefill),
                ReplayStep::DropLink,
            ]
        );
    }

    #[test]
    fn test_capture_errors_name_the_line() {
        let err = parse_replay("scale 1 mL\nbarometer 3").unwrap_err();
        assert_eq!(err.line, 2);

        let err = parse_replay("manual lots").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
