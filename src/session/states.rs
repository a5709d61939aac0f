//! Connection lifecycle state machine
//! States: Idle, Scanning, Connecting, Connected, Disconnected

use crate::ble::{DiscoveredPeripheral, PeripheralId, RestoredPeripheral};
use crate::types::ConnectionState;
use log::{debug, info, warn};
use statig::prelude::*;

const MAX_OUTPUTS: usize = 8;

// Input events to the state machine
#[derive(Debug, Clone)]
pub enum SessionInput {
    AdapterPoweredOn,
    AdapterUnavailable,
    StartScanning,
    Discovered(DiscoveredPeripheral),
    Connected(PeripheralId),
    ConnectFailed(PeripheralId),
    Disconnected(PeripheralId),
    Restored(RestoredPeripheral),
    Shutdown,
}

// Transport requests and outward notifications produced by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    DiscoverCharacteristics(PeripheralId),
    ConnectionChanged { connected: bool },
}

/// One connection cycle to the bottle. Recreated on every reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub peripheral: PeripheralId,
    pub name: Option<String>,
    /// Consecutive connect attempts without a successful connection.
    pub attempt: u32,
}

impl Session {
    fn new(peripheral: PeripheralId, name: Option<String>) -> Self {
        Self { peripheral, name, attempt: 1 }
    }

    fn next_cycle(&self) -> Self {
        Self {
            peripheral: self.peripheral.clone(),
            name: self.name.clone(),
            attempt: self.attempt + 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionContext {
    session: Option<Session>,
    reconnects: u32,
    outputs: heapless::Vec<SessionOutput, MAX_OUTPUTS>,
}

impl SessionContext {
    fn emit(&mut self, output: SessionOutput) {
        if let Err(dropped) = self.outputs.push(output) {
            warn!("Session output buffer full, dropping {:?}", dropped);
        }
    }

    fn is_current(&self, id: &PeripheralId) -> bool {
        self.session.as_ref().map(|s| &s.peripheral == id).unwrap_or(false)
    }

    fn current_peripheral(&self) -> Option<PeripheralId> {
        self.session.as_ref().map(|s| s.peripheral.clone())
    }
}

#[derive(Debug, Default)]
pub struct SessionStateMachine;

#[state_machine(
    initial = "State::idle()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl SessionStateMachine {
    /// 💤 IDLE - adapter off or supervisor not started
    #[state]
    fn idle(context: &mut SessionContext, event: &SessionInput) -> Response<State> {
        use Response::*;

        match event {
            SessionInput::AdapterPoweredOn | SessionInput::StartScanning => {
                context.emit(SessionOutput::StartScan);
                Transition(State::scanning())
            }
            SessionInput::Restored(restored) => Self::adopt_restored(context, restored),
            _ => Handled,
        }
    }

    /// 🔍 SCANNING - waiting for the bottle to advertise
    #[state]
    fn scanning(context: &mut SessionContext, event: &SessionInput) -> Response<State> {
        use Response::*;

        match event {
            SessionInput::Discovered(peripheral) => {
                info!(
                    "🎯 Discovered bottle {} ({})",
                    peripheral.id,
                    peripheral.name.as_deref().unwrap_or("Unknown")
                );
                context.emit(SessionOutput::StopScan);
                let session = Session::new(peripheral.id.clone(), peripheral.name.clone());
                context.emit(SessionOutput::Connect(session.peripheral.clone()));
                context.session = Some(session);
                Transition(State::connecting())
            }
            SessionInput::Restored(restored) => {
                context.emit(SessionOutput::StopScan);
                Self::adopt_restored(context, restored)
            }
            SessionInput::AdapterUnavailable => Transition(State::idle()),
            SessionInput::Shutdown => {
                context.emit(SessionOutput::StopScan);
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    /// 🔗 CONNECTING - one connect request outstanding
    #[state]
    fn connecting(context: &mut SessionContext, event: &SessionInput) -> Response<State> {
        use Response::*;

        match event {
            SessionInput::Connected(id) if context.is_current(id) => {
                Self::on_connected(context, id);
                Transition(State::connected())
            }
            SessionInput::ConnectFailed(id) if context.is_current(id) => {
                Self::retry_connect(context);
                Handled
            }
            SessionInput::AdapterUnavailable => Transition(State::idle()),
            SessionInput::Shutdown => {
                if let Some(id) = context.current_peripheral() {
                    context.emit(SessionOutput::CancelConnection(id));
                }
                Transition(State::idle())
            }
            // Duplicate advertisements must not start a second attempt
            _ => Handled,
        }
    }

    /// 📶 CONNECTED - telemetry flowing
    #[state]
    fn connected(context: &mut SessionContext, event: &SessionInput) -> Response<State> {
        use Response::*;

        match event {
            SessionInput::Disconnected(id) if context.is_current(id) => {
                warn!("📴 Bottle {} disconnected - reconnecting immediately", id);
                context.emit(SessionOutput::ConnectionChanged { connected: false });
                context.session = context.session.as_ref().map(Session::next_cycle);
                context.reconnects += 1;
                context.emit(SessionOutput::Connect(id.clone()));
                Transition(State::disconnected())
            }
            SessionInput::AdapterUnavailable => {
                context.emit(SessionOutput::ConnectionChanged { connected: false });
                Transition(State::idle())
            }
            SessionInput::Shutdown => {
                if let Some(id) = context.current_peripheral() {
                    context.emit(SessionOutput::CancelConnection(id));
                }
                context.emit(SessionOutput::ConnectionChanged { connected: false });
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    /// 🔄 DISCONNECTED - reconnect outstanding to the same peripheral
    #[state]
    fn disconnected(context: &mut SessionContext, event: &SessionInput) -> Response<State> {
        use Response::*;

        match event {
            SessionInput::Connected(id) if context.is_current(id) => {
                Self::on_connected(context, id);
                Transition(State::connected())
            }
            SessionInput::ConnectFailed(id) if context.is_current(id) => {
                Self::retry_connect(context);
                Handled
            }
            SessionInput::StartScanning | SessionInput::AdapterPoweredOn => {
                if let Some(id) = context.current_peripheral() {
                    context.emit(SessionOutput::CancelConnection(id));
                }
                context.emit(SessionOutput::StartScan);
                Transition(State::scanning())
            }
            SessionInput::AdapterUnavailable => Transition(State::idle()),
            SessionInput::Shutdown => {
                if let Some(id) = context.current_peripheral() {
                    context.emit(SessionOutput::CancelConnection(id));
                }
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    fn adopt_restored(context: &mut SessionContext, restored: &RestoredPeripheral) -> Response<State> {
        let session = Session::new(restored.id.clone(), None);
        context.session = Some(session);

        if restored.connected {
            info!("♻️ Adopting restored connection to {}", restored.id);
            Self::on_connected(context, &restored.id);
            Response::Transition(State::connected())
        } else {
            info!("♻️ Restored peripheral {} not connected - reconnecting", restored.id);
            context.emit(SessionOutput::Connect(restored.id.clone()));
            Response::Transition(State::connecting())
        }
    }

    fn on_connected(context: &mut SessionContext, id: &PeripheralId) {
        if let Some(session) = context.session.as_mut() {
            info!("✅ Connected to {} after {} attempt(s)", id, session.attempt);
            session.attempt = 0;
        }
        context.emit(SessionOutput::ConnectionChanged { connected: true });
        context.emit(SessionOutput::DiscoverCharacteristics(id.clone()));
    }

    fn retry_connect(context: &mut SessionContext) {
        if let Some(session) = context.session.as_mut() {
            session.attempt += 1;
            debug!("Connect attempt {} to {} failed - retrying", session.attempt - 1, session.peripheral);
            let id = session.peripheral.clone();
            context.emit(SessionOutput::Connect(id));
        }
    }

    fn on_transition(&mut self, source: &State, target: &State) {
        let source_state = Self::state_to_connection_state(source);
        let target_state = Self::state_to_connection_state(target);

        if source_state != target_state {
            info!("🔄 Connection state transition: {:?} -> {:?}", source_state, target_state);
        }
    }

    fn state_to_connection_state(state: &State) -> ConnectionState {
        match state {
            State::Idle {} => ConnectionState::Idle,
            State::Scanning {} => ConnectionState::Scanning,
            State::Connecting {} => ConnectionState::Connecting,
            State::Connected {} => ConnectionState::Connected,
            State::Disconnected {} => ConnectionState::Disconnected,
        }
    }
}

/// Owns the connection state machine and its context.
pub struct SessionMachine {
    machine: statig::prelude::StateMachine<SessionStateMachine>,
    context: SessionContext,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            machine: SessionStateMachine::default().state_machine(),
            context: SessionContext::default(),
        }
    }

    /// Process an input and return the requests it produced, in order.
    pub fn handle_input(&mut self, input: SessionInput) -> heapless::Vec<SessionOutput, MAX_OUTPUTS> {
        self.context.outputs.clear();
        self.machine.handle_with_context(&input, &mut self.context);
        std::mem::take(&mut self.context.outputs)
    }

    pub fn connection_state(&self) -> ConnectionState {
        SessionStateMachine::state_to_connection_state(self.machine.state())
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn session(&self) -> Option<&Session> {
        self.context.session.as_ref()
    }

    /// Total reconnect cycles since start.
    pub fn reconnects(&self) -> u32 {
        self.context.reconnects
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
