use crate::{
    ble::{BleTransport, PeripheralEvent, PeripheralEventChannel},
    command::CommandChannel,
    intake::engine::{IntakeEngine, ScaleOutcome},
    protocol::CommandOpcode,
    reminder::ReminderGate,
    scheduler::MidnightScheduler,
    session::supervisor::{ConnectionSupervisor, SupervisorEvent},
    state::StateManager,
    storage::KeyValueStore,
    system::{
        config::AppConfig,
        events::{EventBus, TrackerEvent, UserCommand},
    },
    types::{Reading, TrackerState},
};
use embassy_futures::select::{select, select3, Either3};
use embassy_futures::yield_now;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};
use log::{debug, info, warn};
use std::sync::Arc;

pub type UserCommandChannel = Channel<CriticalSectionRawMutex, UserCommand, 16>;
pub type ShutdownSignal = Signal<CriticalSectionRawMutex, ()>;

/// Wires the bottle connection, intake engine, midnight reset and published state together.
/// Platform events and user commands are consumed by one loop in arrival order.
pub struct WaterTracker<T: BleTransport, S: KeyValueStore> {
    state_manager: StateManager,
    supervisor: ConnectionSupervisor<T>,
    commands: CommandChannel<T>,
    engine: Arc<IntakeEngine<S>>,
    scheduler: Arc<MidnightScheduler>,
    reminder: Arc<ReminderGate>,
    events: Arc<EventBus>,

    peripheral_events: Arc<PeripheralEventChannel>,
    user_commands: Arc<UserCommandChannel>,
    shutdown: Arc<ShutdownSignal>,
}

impl<T: BleTransport, S: KeyValueStore> WaterTracker<T, S> {
    pub fn new(
        transport: Arc<T>,
        peripheral_events: Arc<PeripheralEventChannel>,
        store: S,
        config: &AppConfig,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let engine = IntakeEngine::new(store, config.detection, Arc::clone(&events))
            .with_ml_per_glass(config.ml_per_glass);

        Self {
            state_manager: StateManager::new(),
            supervisor: ConnectionSupervisor::new(Arc::clone(&transport), Arc::clone(&peripheral_events)),
            commands: CommandChannel::new(transport),
            engine: Arc::new(engine),
            scheduler: Arc::new(MidnightScheduler::new()),
            reminder: Arc::new(ReminderGate::new()),
            events,

            peripheral_events,
            user_commands: Arc::new(Channel::new()),
            shutdown: Arc::new(Signal::new()),
        }
    }

    pub fn user_commands(&self) -> Arc<UserCommandChannel> {
        Arc::clone(&self.user_commands)
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn engine(&self) -> Arc<IntakeEngine<S>> {
        Arc::clone(&self.engine)
    }

    pub fn reminder(&self) -> Arc<ReminderGate> {
        Arc::clone(&self.reminder)
    }

    pub async fn tracker_state(&self) -> TrackerState {
        self.state_manager.get_full_state().await
    }

    /// Run until the shutdown signal fires, then tear the connection down and save.
    pub async fn run(&mut self) {
        info!("💧 Starting water tracker");
        self.sync_intake().await;

        let engine = Arc::clone(&self.engine);
        let scheduler = Arc::clone(&self.scheduler);
        let events = Arc::clone(&self.events);
        let reminder = Arc::clone(&self.reminder);

        select(
            self.main_loop(),
            select(scheduler.run(&engine), track_intake_hours(&events, &reminder)),
        )
        .await;

        info!("Water tracker stopped");
    }

    async fn main_loop(&mut self) {
        let peripheral_events = Arc::clone(&self.peripheral_events);
        let user_commands = Arc::clone(&self.user_commands);
        let shutdown = Arc::clone(&self.shutdown);

        loop {
            let peripheral_fut = peripheral_events.receive();
            let command_fut = user_commands.receive();
            let shutdown_fut = shutdown.wait();

            match select3(peripheral_fut, command_fut, shutdown_fut).await {
                Either3::First(event) => {
                    let retrying = matches!(event, PeripheralEvent::ConnectFailed { .. });
                    self.handle_peripheral_event(event).await;
                    if retrying {
                        // Let other tasks run between back-to-back connect attempts
                        yield_now().await;
                    }
                }
                Either3::Second(command) => self.handle_user_command(command).await,
                Either3::Third(()) => {
                    self.teardown().await;
                    return;
                }
            }
        }
    }

    pub(crate) async fn handle_peripheral_event(&mut self, event: PeripheralEvent) {
        let updates = self.supervisor.handle_event(event);
        self.apply_supervisor_events(updates).await;
    }

    pub(crate) async fn handle_user_command(&mut self, command: UserCommand) {
        debug!("User command: {:?}", command);

        match command {
            UserCommand::AddManual(volume_ml) => {
                if let Err(e) = self.engine.add_manual(volume_ml).await {
                    warn!("Manual entry rejected: {}", e);
                    self.state_manager.set_error(Some(e.to_string())).await;
                }
            }
            UserCommand::AddGlasses(glasses) => {
                if let Err(e) = self.engine.add_glasses(glasses).await {
                    warn!("Manual entry rejected: {}", e);
                    self.state_manager.set_error(Some(e.to_string())).await;
                }
            }
            UserCommand::ToggleRefill => self.send_command(CommandOpcode::Refill),
            UserCommand::Calibrate => self.send_command(CommandOpcode::Calibrate),
            UserCommand::Calculate => self.send_command(CommandOpcode::Calculate),
            UserCommand::ResetDaily => self.engine.reset_daily().await,
            UserCommand::ConfirmRefill => self.engine.confirm_refill().await,
            UserCommand::StartScanning => {
                let updates = self.supervisor.start_scanning();
                self.apply_supervisor_events(updates).await;
            }
            UserCommand::EnterForeground => {
                info!("App entering foreground - reloading intake");
                self.engine.reload().await;
                if !self.supervisor.is_connected() {
                    let updates = self.supervisor.start_scanning();
                    self.apply_supervisor_events(updates).await;
                }
            }
            UserCommand::EnterBackground => {
                info!("App entering background - saving intake");
                self.engine.persist().await;
            }
        }

        self.sync_intake().await;
    }

    fn send_command(&mut self, opcode: CommandOpcode) {
        if let Err(e) = self.commands.send(opcode) {
            warn!("{} command not sent: {}", opcode.name(), e);
        }
    }

    async fn apply_supervisor_events(&mut self, updates: Vec<SupervisorEvent>) {
        self.state_manager
            .set_connection_state(self.supervisor.connection_state())
            .await;

        for update in updates {
            match update {
                SupervisorEvent::ConnectionChanged(connected) => {
                    info!("🔗 Bottle {}", if connected { "connected" } else { "disconnected" });
                    self.events.publish(TrackerEvent::ConnectionChanged(connected));
                }
                SupervisorEvent::Reading(reading) => self.handle_reading(reading).await,
                SupervisorEvent::CommandTargetChanged(target) => self.commands.set_target(target),
                SupervisorEvent::WriteCompleted { characteristic, result } => {
                    let Some(ack) = self.commands.on_write_completed(characteristic, result) else {
                        continue;
                    };
                    if ack.is_refill_accepted() {
                        self.engine.toggle_refill_mode().await;
                        self.sync_intake().await;
                    } else if let Err(e) = ack.result {
                        self.state_manager
                            .set_error(Some(format!("{} command failed: {}", ack.opcode.name(), e)))
                            .await;
                    }
                }
            }
        }
    }

    async fn handle_reading(&mut self, reading: Reading) {
        self.state_manager.apply_reading(&reading).await;

        if let Reading::Scale { volume_ml, .. } = &reading {
            let outcome = self.engine.on_scale_reading(*volume_ml).await;
            if outcome != ScaleOutcome::Noise {
                debug!("Scale outcome: {:?}", outcome);
            }
            self.sync_intake().await;
        }

        self.events.publish(TrackerEvent::Telemetry(reading));
    }

    async fn sync_intake(&self) {
        let snapshot = self.engine.snapshot().await;
        self.state_manager.update_intake(snapshot).await;
    }

    async fn teardown(&mut self) {
        info!("🛑 Shutdown requested");
        let updates = self.supervisor.shutdown();
        self.apply_supervisor_events(updates).await;
        self.commands.set_target(None);
        self.scheduler.cancel();
        self.engine.persist().await;
    }
}

async fn track_intake_hours(events: &EventBus, reminder: &ReminderGate) {
    let Some(mut subscriber) = events.subscriber() else {
        warn!("No event subscriber slot left - reminders will not be suppressed");
        return core::future::pending().await;
    };

    loop {
        if let TrackerEvent::IntakeOccurred { hour } = subscriber.next_event().await {
            reminder.record_intake(hour);
        }
    }
}
