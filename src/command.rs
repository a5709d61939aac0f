//! Single-byte commands to the bottle's command characteristic.

use crate::ble::{BleError, BleTransport, PeripheralId};
use crate::protocol::CommandOpcode;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Where commands are written. Present only while connected with the characteristic found.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTarget {
    pub peripheral: PeripheralId,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// No connection, or the command characteristic was not found on the bottle.
    Unavailable,
    Transport(BleError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CommandError::Unavailable => write!(f, "Command characteristic unavailable"),
            CommandError::Transport(e) => write!(f, "Command write failed: {}", e),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<BleError> for CommandError {
    fn from(e: BleError) -> Self {
        CommandError::Transport(e)
    }
}

/// A command write the peripheral has answered.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub opcode: CommandOpcode,
    pub result: Result<(), BleError>,
}

impl CommandAck {
    pub fn is_refill_accepted(&self) -> bool {
        self.opcode == CommandOpcode::Refill && self.result.is_ok()
    }
}

pub struct CommandChannel<T: BleTransport> {
    transport: Arc<T>,
    target: Option<CommandTarget>,
    in_flight: VecDeque<CommandOpcode>,
}

impl<T: BleTransport> CommandChannel<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            target: None,
            in_flight: VecDeque::new(),
        }
    }

    pub fn set_target(&mut self, target: Option<CommandTarget>) {
        if target.is_none() && !self.in_flight.is_empty() {
            debug!("Dropping {} unacknowledged command(s)", self.in_flight.len());
            self.in_flight.clear();
        }
        self.target = target;
    }

    pub fn is_available(&self) -> bool {
        self.target.is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Write the opcode with response. Failures are returned for logging and never retried.
    pub fn send(&mut self, opcode: CommandOpcode) -> Result<(), CommandError> {
        let target = self.target.as_ref().ok_or(CommandError::Unavailable)?;

        self.transport
            .write_with_response(&target.peripheral, target.characteristic, &opcode.encode())?;
        info!("📤 Sent {} command", opcode.name());
        self.in_flight.push_back(opcode);
        Ok(())
    }

    /// Match a write completion to the oldest command still waiting for one.
    pub fn on_write_completed(&mut self, characteristic: Uuid, result: Result<(), BleError>) -> Option<CommandAck> {
        let target = self.target.as_ref()?;
        if target.characteristic != characteristic {
            return None;
        }

        let opcode = self.in_flight.pop_front()?;
        match &result {
            Ok(()) => info!("✅ Bottle acknowledged {} command", opcode.name()),
            Err(e) => warn!("Bottle rejected {} command: {}", opcode.name(), e),
        }
        Some(CommandAck { opcode, result })
    }
}
