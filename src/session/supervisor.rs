//! Connection supervisor
//!
//! Feeds platform events through the [`SessionMachine`], executes the requests it produces
//! on the transport, binds the bottle characteristics once connected and decodes telemetry
//! notifications into [`Reading`]s.

use crate::ble::{BleError, BleTransport, PeripheralEvent, PeripheralEventChannel, PeripheralId};
use crate::command::CommandTarget;
use crate::protocol::{self, TelemetryChannel, BOTTLE_SERVICE_UUID};
use crate::session::states::{Session, SessionInput, SessionMachine, SessionOutput};
use crate::types::{ConnectionState, Reading};
use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// What the rest of the system needs to hear about after a peripheral event.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    ConnectionChanged(bool),
    Reading(Reading),
    CommandTargetChanged(Option<CommandTarget>),
    WriteCompleted { characteristic: Uuid, result: Result<(), BleError> },
}

pub struct ConnectionSupervisor<T: BleTransport> {
    transport: Arc<T>,
    /// Request failures the transport reports synchronously are fed back through here
    feedback: Arc<PeripheralEventChannel>,
    machine: SessionMachine,
    service: Uuid,
    subscribed: Vec<TelemetryChannel>,
    command_target: Option<CommandTarget>,
}

impl<T: BleTransport> ConnectionSupervisor<T> {
    pub fn new(transport: Arc<T>, feedback: Arc<PeripheralEventChannel>) -> Self {
        Self {
            transport,
            feedback,
            machine: SessionMachine::new(),
            service: BOTTLE_SERVICE_UUID,
            subscribed: Vec::new(),
            command_target: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.machine.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    pub fn session(&self) -> Option<&Session> {
        self.machine.session()
    }

    pub fn command_target(&self) -> Option<&CommandTarget> {
        self.command_target.as_ref()
    }

    pub fn subscribed_channels(&self) -> &[TelemetryChannel] {
        &self.subscribed
    }

    pub fn start_scanning(&mut self) -> Vec<SupervisorEvent> {
        self.apply(SessionInput::StartScanning)
    }

    /// Stop scanning and cancel any pending or active connection.
    pub fn shutdown(&mut self) -> Vec<SupervisorEvent> {
        info!("🛑 Shutting down connection supervisor");
        self.apply(SessionInput::Shutdown)
    }

    pub fn handle_event(&mut self, event: PeripheralEvent) -> Vec<SupervisorEvent> {
        match event {
            PeripheralEvent::AdapterStateChanged { powered_on: true } => {
                info!("📡 Bluetooth powered on - scanning for bottle");
                self.apply(SessionInput::AdapterPoweredOn)
            }
            PeripheralEvent::AdapterStateChanged { powered_on: false } => {
                warn!("Bluetooth not available");
                self.apply(SessionInput::AdapterUnavailable)
            }
            PeripheralEvent::Discovered(peripheral) => self.apply(SessionInput::Discovered(peripheral)),
            PeripheralEvent::Connected(id) => self.apply(SessionInput::Connected(id)),
            PeripheralEvent::ConnectFailed { id, reason } => {
                warn!("Connect to {} failed: {}", id, reason);
                self.apply(SessionInput::ConnectFailed(id))
            }
            PeripheralEvent::Disconnected { id, reason } => {
                if let Some(reason) = reason {
                    warn!("Disconnected from {}: {}", id, reason);
                }
                self.apply(SessionInput::Disconnected(id))
            }
            PeripheralEvent::RestoredState(peripherals) => {
                info!("♻️ Restoring {} peripheral(s) from previous launch", peripherals.len());
                let mut events = Vec::new();
                for restored in peripherals {
                    events.extend(self.apply(SessionInput::Restored(restored)));
                }
                events
            }
            PeripheralEvent::CharacteristicsDiscovered { id, characteristics } => {
                self.bind_characteristics(&id, &characteristics)
            }
            PeripheralEvent::CharacteristicUpdated { characteristic, value } => {
                match protocol::decode_characteristic(&characteristic, &value) {
                    Some(reading) => vec![SupervisorEvent::Reading(reading)],
                    None => Vec::new(),
                }
            }
            PeripheralEvent::WriteCompleted { characteristic, result } => {
                vec![SupervisorEvent::WriteCompleted { characteristic, result }]
            }
        }
    }

    fn apply(&mut self, input: SessionInput) -> Vec<SupervisorEvent> {
        let outputs = self.machine.handle_input(input);
        let mut events = Vec::new();

        for output in outputs {
            match output {
                SessionOutput::StartScan => {
                    if let Err(e) = self.transport.start_scan(self.service, true) {
                        error!("Failed to start scan: {}", e);
                    }
                }
                SessionOutput::StopScan => {
                    if let Err(e) = self.transport.stop_scan() {
                        warn!("Failed to stop scan: {}", e);
                    }
                }
                SessionOutput::Connect(id) => {
                    if let Err(e) = self.transport.connect(&id) {
                        error!("Failed to request connection to {}: {}", id, e);
                        self.report_connect_error(id, e);
                    }
                }
                SessionOutput::CancelConnection(id) => {
                    if let Err(e) = self.transport.cancel_connection(&id) {
                        warn!("Failed to cancel connection to {}: {}", id, e);
                    }
                }
                SessionOutput::DiscoverCharacteristics(id) => {
                    let wanted: Vec<Uuid> = TelemetryChannel::ALL.iter().map(|c| c.uuid()).collect();
                    if let Err(e) = self.transport.discover_characteristics(&id, self.service, &wanted) {
                        error!("Failed to discover characteristics on {}: {}", id, e);
                    }
                }
                SessionOutput::ConnectionChanged { connected } => {
                    if !connected {
                        self.subscribed.clear();
                        if self.command_target.take().is_some() {
                            events.push(SupervisorEvent::CommandTargetChanged(None));
                        }
                    }
                    events.push(SupervisorEvent::ConnectionChanged(connected));
                }
            }
        }

        events
    }

    // Queued behind anything already pending so the retry keeps event order
    fn report_connect_error(&self, id: PeripheralId, error: BleError) {
        let event = match error {
            BleError::AdapterUnavailable => PeripheralEvent::AdapterStateChanged { powered_on: false },
            other => PeripheralEvent::ConnectFailed {
                id,
                reason: other.to_string(),
            },
        };
        if self.feedback.try_send(event).is_err() {
            warn!("Peripheral event channel full - connect failure not reported");
        }
    }

    fn bind_characteristics(&mut self, id: &PeripheralId, characteristics: &[Uuid]) -> Vec<SupervisorEvent> {
        let current = self.machine.session().map(|s| &s.peripheral == id).unwrap_or(false);
        if !self.machine.is_connected() || !current {
            debug!("Ignoring characteristics from {} - not the active session", id);
            return Vec::new();
        }

        self.subscribed.clear();
        let mut command_target = None;

        for channel in TelemetryChannel::ALL {
            let uuid = channel.uuid();
            if !characteristics.contains(&uuid) {
                warn!("⚠️ {:?} characteristic {} not found - feature disabled", channel, uuid);
                continue;
            }

            if channel.is_telemetry() {
                match self.transport.subscribe(id, uuid) {
                    Ok(()) => {
                        info!("📊 Subscribed to {:?} notifications", channel);
                        self.subscribed.push(channel);
                    }
                    Err(e) => warn!("Failed to subscribe to {:?}: {}", channel, e),
                }
            } else {
                info!("Found command characteristic {}", uuid);
                command_target = Some(CommandTarget {
                    peripheral: id.clone(),
                    characteristic: uuid,
                });
            }
        }

        if command_target.is_none() {
            warn!("Command characteristic missing - calibrate/calculate/refill commands will not work");
        }

        self.command_target = command_target.clone();
        vec![SupervisorEvent::CommandTargetChanged(command_target)]
    }
}
