//! Single owner of the radio: composes advertising, the GATT server and the
//! connection dispatcher behind one start/stop surface.
//!
//! All state lives in one task. Caller commands and platform events are
//! both queued to it, so a connect event and a `stop_advertising` call can
//! never race on the advertising flag.
use crate::advertising::{AdvertisingController, AdvertisingPhase};
use crate::config::PeripheralConfig;
use crate::dispatcher::{ConnectionDispatcher, PolicyAction};
use crate::gatt::peripheral_event::PeripheralEvent;
use crate::gatt_server::{GattServerController, GattServerState};
use crate::log_sink::{EventLog, NewEntry};
use crate::peripheral::PeripheralServer;
use crate::response_channel;
use crate::state::{PeripheralState, PeripheralStatus};
use crate::Error;
use log::{debug, info, trace};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    StartAdvertising,
    StopAdvertising,
    StartGattServer,
    CloseGattServer,
    Flush,
    Shutdown,
}

pub struct PeripheralCoordinator {
    commands: response_channel::Sender<Command, ()>,
    status_rx: watch::Receiver<PeripheralStatus>,
    log: EventLog,
    task: JoinHandle<()>,
}

impl PeripheralCoordinator {
    /// Spawns the coordinator task on the current tokio runtime.
    ///
    /// `events` must be the receiving end of the sender `backend` reports on.
    pub fn new<P>(
        config: PeripheralConfig,
        backend: P,
        events: mpsc::Receiver<PeripheralEvent>,
    ) -> Result<Self, Error>
    where
        P: PeripheralServer + 'static,
    {
        config.validate()?;
        let log = EventLog::with_capacity(config.log_capacity);
        let (status_tx, status_rx) = watch::channel(PeripheralStatus::default());
        let (commands, command_rx) = response_channel::channel(COMMAND_BUFFER);

        let worker = Worker {
            backend: Box::new(backend),
            advertising: AdvertisingController::new(config.advertisement()),
            gatt: GattServerController::from_service(config.service()),
            dispatcher: ConnectionDispatcher::new(config.connection_policy),
            log: log.clone(),
            status_tx,
            command_rx,
            events,
            events_open: true,
        };
        let task = tokio::spawn(worker.run());

        Ok(PeripheralCoordinator {
            commands,
            status_rx,
            log,
            task,
        })
    }

    pub async fn start_advertising(&self) -> Result<(), Error> {
        self.send(Command::StartAdvertising).await
    }

    pub async fn stop_advertising(&self) -> Result<(), Error> {
        self.send(Command::StopAdvertising).await
    }

    pub async fn start_gatt_server(&self) -> Result<(), Error> {
        self.send(Command::StartGattServer).await
    }

    pub async fn close_gatt_server(&self) -> Result<(), Error> {
        self.send(Command::CloseGattServer).await
    }

    /// Returns once every command and platform event queued before this
    /// call has been applied.
    pub async fn flush(&self) -> Result<(), Error> {
        self.send(Command::Flush).await
    }

    /// Stops advertising, closes the server and ends the coordinator task.
    pub async fn shutdown(self) -> Result<(), Error> {
        self.send(Command::Shutdown).await?;
        self.task.await.map_err(|err| {
            Error::new("coordinator task failed", err.to_string(), crate::ErrorType::Unknown)
        })
    }

    pub fn is_advertising(&self) -> bool {
        self.status_rx.borrow().is_advertising
    }

    pub fn is_gatt_server_running(&self) -> bool {
        self.status_rx.borrow().is_gatt_server_running
    }

    pub fn state(&self) -> PeripheralState {
        self.status_rx.borrow().state
    }

    /// Watch for flag and state changes.
    pub fn status(&self) -> watch::Receiver<PeripheralStatus> {
        self.status_rx.clone()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    async fn send(&self, command: Command) -> Result<(), Error> {
        trace!("coordinator command {:?}", command);
        Ok(self.commands.send_await_automatic(command).await?)
    }
}

struct Worker {
    backend: Box<dyn PeripheralServer>,
    advertising: AdvertisingController,
    gatt: GattServerController,
    dispatcher: ConnectionDispatcher,
    log: EventLog,
    status_tx: watch::Sender<PeripheralStatus>,
    command_rx: response_channel::Receiver<Command, ()>,
    events: mpsc::Receiver<PeripheralEvent>,
    events_open: bool,
}

impl Worker {
    async fn run(mut self) {
        debug!("peripheral coordinator started");
        loop {
            tokio::select! {
                biased;
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("platform event channel closed");
                        self.events_open = false;
                    }
                },
                command = self.command_rx.recv() => match command {
                    Some((Command::Shutdown, reply)) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some((command, reply)) => {
                        self.handle_command(command).await;
                        self.publish();
                        let _ = reply.send(());
                    }
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
            }
            self.publish();
        }
        debug!("peripheral coordinator stopped");
    }

    // Failures are already in the log and on the controllers.
    async fn handle_command(&mut self, command: Command) {
        let _ = match command {
            Command::StartAdvertising => self.advertising.start(&mut *self.backend, &self.log).await,
            Command::StopAdvertising => self.advertising.stop(&mut *self.backend, &self.log).await,
            Command::StartGattServer => self.gatt.start(&mut *self.backend, &self.log).await,
            Command::CloseGattServer => {
                let result = self.gatt.close(&mut *self.backend, &self.log).await;
                self.dispatcher.clear();
                result
            }
            Command::Flush | Command::Shutdown => Ok(()),
        };
    }

    async fn handle_event(&mut self, event: PeripheralEvent) {
        trace!("platform event {:?}", event);
        match event {
            PeripheralEvent::StateUpdate { is_powered } => {
                if is_powered {
                    info!("bluetooth radio powered on");
                    return;
                }
                self.log.append(NewEntry::warning("Bluetooth powered off"));
                self.advertising.on_power_lost(&self.log);
                self.gatt.on_power_lost(&mut *self.backend, &self.log).await;
                self.dispatcher.clear();
            }
            PeripheralEvent::AdvertisingStarted { generation, error } => {
                self.advertising.on_started(generation, error, &self.log);
            }
            PeripheralEvent::ServiceAdded {
                generation,
                service,
                error,
            } => {
                self.gatt
                    .on_service_added(generation, service, error, &mut *self.backend, &self.log)
                    .await;
            }
            PeripheralEvent::ConnectionStateChanged {
                client,
                name,
                state,
            } => {
                if self.gatt.state() == GattServerState::Closed {
                    debug!("connection event from {} with server closed", client);
                    return;
                }
                let action = self.dispatcher.on_connection_state_changed(
                    &client,
                    name.as_deref(),
                    state,
                    &self.log,
                );
                let _ = match action {
                    PolicyAction::None => Ok(()),
                    PolicyAction::StopAdvertising
                        if self.advertising.phase() != AdvertisingPhase::Idle =>
                    {
                        self.advertising.stop(&mut *self.backend, &self.log).await
                    }
                    PolicyAction::ResumeAdvertising
                        if self.advertising.phase() == AdvertisingPhase::Idle =>
                    {
                        self.advertising.start(&mut *self.backend, &self.log).await
                    }
                    _ => Ok(()),
                };
            }
            PeripheralEvent::CharacteristicSubscriptionUpdate {
                request,
                subscribed,
            } => {
                self.dispatcher
                    .on_subscription_update(&request, subscribed, &self.log);
            }
            PeripheralEvent::ReadRequest {
                request,
                request_id,
                offset,
                responder,
            } => {
                let registered = self.gatt.registered_characteristic(request.characteristic);
                self.dispatcher.on_read_request(
                    &request, request_id, offset, responder, registered, &self.log,
                );
            }
        }
    }

    async fn teardown(&mut self) {
        if self.advertising.phase() != AdvertisingPhase::Idle {
            let _ = self.advertising.stop(&mut *self.backend, &self.log).await;
        }
        if self.gatt.state() != GattServerState::Closed {
            let _ = self.gatt.close(&mut *self.backend, &self.log).await;
        }
        self.dispatcher.clear();
        self.publish();
    }

    fn publish(&self) {
        let is_advertising = self.advertising.is_advertising();
        let is_gatt_server_running = self.gatt.is_running();
        let connected_peers = if is_gatt_server_running {
            self.dispatcher.connected_peers()
        } else {
            Vec::new()
        };
        let status = PeripheralStatus {
            is_advertising,
            is_gatt_server_running,
            state: PeripheralState::derive(
                is_advertising,
                is_gatt_server_running,
                !connected_peers.is_empty(),
            ),
            connected_peers,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
