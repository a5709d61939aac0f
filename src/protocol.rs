use crate::types::{Reading, Vector3};
use bstr::ByteSlice;
use log::{debug, warn};
use uuid::Uuid;

pub const BOTTLE_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);
pub const ACCEL_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef1);
pub const GYRO_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef2);
pub const SCALE_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef3);
pub const ORIENTATION_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef4);
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef5);

/// Characteristics exposed by the bottle service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryChannel {
    Accelerometer,
    Gyroscope,
    Scale,
    Orientation,
    Command,
}

impl TelemetryChannel {
    pub const ALL: [TelemetryChannel; 5] = [
        TelemetryChannel::Accelerometer,
        TelemetryChannel::Gyroscope,
        TelemetryChannel::Scale,
        TelemetryChannel::Orientation,
        TelemetryChannel::Command,
    ];

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.iter().copied().find(|channel| channel.uuid() == *uuid)
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            TelemetryChannel::Accelerometer => ACCEL_CHAR_UUID,
            TelemetryChannel::Gyroscope => GYRO_CHAR_UUID,
            TelemetryChannel::Scale => SCALE_CHAR_UUID,
            TelemetryChannel::Orientation => ORIENTATION_CHAR_UUID,
            TelemetryChannel::Command => COMMAND_CHAR_UUID,
        }
    }

    /// Notify characteristics; the command characteristic is write-only.
    pub fn is_telemetry(&self) -> bool {
        !matches!(self, TelemetryChannel::Command)
    }
}

/// Single-byte opcodes written to the command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOpcode {
    Calibrate = 1,
    Calculate = 2,
    Refill = 3,
}

impl CommandOpcode {
    pub fn encode(self) -> [u8; 1] {
        [self as u8]
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(CommandOpcode::Calibrate),
            2 => Some(CommandOpcode::Calculate),
            3 => Some(CommandOpcode::Refill),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandOpcode::Calibrate => "calibrate",
            CommandOpcode::Calculate => "calculate",
            CommandOpcode::Refill => "refill",
        }
    }
}

// Firmware pads some frames with NULs
fn strip_padding(data: &[u8]) -> &[u8] {
    data.trim_end_with(|c| c == '\0')
}

fn trim_frame(data: &[u8]) -> &[u8] {
    strip_padding(data).trim()
}

fn parse_component(component: &str) -> f64 {
    component
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Parse an `"x,y,z"` frame. Missing or bad components become `0.0`, extras are ignored.
pub fn parse_vector(data: &[u8]) -> Vector3 {
    let text = trim_frame(data).to_str_lossy();
    let mut components = text.split(',').map(parse_component);

    Vector3 {
        x: components.next().unwrap_or(0.0),
        y: components.next().unwrap_or(0.0),
        z: components.next().unwrap_or(0.0),
    }
}

/// Parse a `"<number> <unit>"` scale frame. Returns `None` when the number is unusable.
pub fn parse_scale(data: &[u8]) -> Option<(f64, String)> {
    let text = match trim_frame(data).to_str() {
        Ok(text) => text,
        Err(_) => {
            warn!("Scale frame is not valid UTF-8: {:02X?}", data);
            return None;
        }
    };

    let (number, unit) = match text.split_once(' ') {
        Some((number, unit)) => (number, unit.trim()),
        None => (text, ""),
    };

    match number.parse::<f64>() {
        Ok(volume) if volume.is_finite() => Some((volume, unit.to_string())),
        _ => {
            warn!("Dropping unparsable scale frame: {:?}", text);
            None
        }
    }
}

/// The label is shown as sent; only NUL padding is removed.
pub fn parse_orientation(data: &[u8]) -> Option<String> {
    match strip_padding(data).to_str() {
        Ok(label) => Some(label.to_string()),
        Err(_) => {
            warn!("Orientation frame is not valid UTF-8: {:02X?}", data);
            None
        }
    }
}

/// Turn a raw notification into a typed reading. Never fails hard.
pub fn decode(channel: TelemetryChannel, data: &[u8]) -> Option<Reading> {
    debug!("Decoding {:?} frame: {:?}", channel, data.as_bstr());

    match channel {
        TelemetryChannel::Accelerometer => Some(Reading::Motion(parse_vector(data))),
        TelemetryChannel::Gyroscope => Some(Reading::Rotation(parse_vector(data))),
        TelemetryChannel::Scale => {
            parse_scale(data).map(|(volume_ml, unit)| Reading::Scale { volume_ml, unit })
        }
        TelemetryChannel::Orientation => parse_orientation(data).map(Reading::Orientation),
        TelemetryChannel::Command => {
            warn!("Ignoring notification on write-only command characteristic");
            None
        }
    }
}

/// Decode by characteristic UUID; unknown characteristics yield nothing.
pub fn decode_characteristic(uuid: &Uuid, data: &[u8]) -> Option<Reading> {
    match TelemetryChannel::from_uuid(uuid) {
        Some(channel) => decode(channel, data),
        None => {
            debug!("Notification from unknown characteristic {}", uuid);
            None
        }
    }
}
