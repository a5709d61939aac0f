//! Transport seam between the connection supervisor and the platform BLE stack.
//!
//! Requests go out through [`BleTransport`] and return immediately; their outcomes come
//! back later as [`PeripheralEvent`]s on a single ordered channel.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use uuid::Uuid;

/// Platform handle for a peripheral. Stable across reconnects of the same device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: i16,
}

/// Peripheral handed back by the platform after the process was relaunched.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredPeripheral {
    pub id: PeripheralId,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    AdapterStateChanged { powered_on: bool },
    Discovered(DiscoveredPeripheral),
    Connected(PeripheralId),
    ConnectFailed { id: PeripheralId, reason: String },
    Disconnected { id: PeripheralId, reason: Option<String> },
    CharacteristicsDiscovered { id: PeripheralId, characteristics: Vec<Uuid> },
    CharacteristicUpdated { characteristic: Uuid, value: Vec<u8> },
    WriteCompleted { characteristic: Uuid, result: Result<(), BleError> },
    RestoredState(Vec<RestoredPeripheral>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BleError {
    AdapterUnavailable,
    NotConnected,
    CharacteristicNotFound(Uuid),
    RequestFailed(String),
}

impl std::fmt::Display for BleError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BleError::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            BleError::NotConnected => write!(f, "Peripheral not connected"),
            BleError::CharacteristicNotFound(uuid) => write!(f, "Characteristic {} not found", uuid),
            BleError::RequestFailed(msg) => write!(f, "BLE request failed: {}", msg),
        }
    }
}

impl std::error::Error for BleError {}

/// Non-blocking BLE central operations. Implementations forward the outcome of every
/// request to the peripheral event channel.
pub trait BleTransport: Send + Sync {
    fn start_scan(&self, service: Uuid, allow_duplicates: bool) -> Result<(), BleError>;

    fn stop_scan(&self) -> Result<(), BleError>;

    fn connect(&self, id: &PeripheralId) -> Result<(), BleError>;

    /// Abort a pending connection attempt or tear down an active connection.
    fn cancel_connection(&self, id: &PeripheralId) -> Result<(), BleError>;

    fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), BleError>;

    fn subscribe(&self, id: &PeripheralId, characteristic: Uuid) -> Result<(), BleError>;

    fn write_with_response(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;
}

pub type PeripheralEventChannel = Channel<CriticalSectionRawMutex, PeripheralEvent, 32>;
