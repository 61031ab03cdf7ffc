use crate::advertising::check_radio;
use crate::gatt::characteristic::Characteristic;
use crate::gatt::service::Service;
use crate::log_sink::{EventLog, NewEntry};
use crate::peripheral::PeripheralServer;
use crate::{Error, ErrorType};
use log::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattServerState {
    Closed,
    /// Registration handed to the stack, not yet confirmed.
    Opening,
    Running,
}

/// Owns registration of the single service. The attribute table is fixed
/// for as long as the server runs.
#[derive(Debug)]
pub struct GattServerController {
    service: Service,
    state: GattServerState,
    generation: u64,
}

impl GattServerController {
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        GattServerController::from_service(Service::new(
            service_uuid,
            true,
            vec![Characteristic::static_readable(characteristic_uuid, value)],
        ))
    }

    pub fn from_service(service: Service) -> Self {
        GattServerController {
            service,
            state: GattServerState::Closed,
            generation: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == GattServerState::Running
    }

    pub fn state(&self) -> GattServerState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The characteristic behind `uuid`, if the server is up and serves it.
    pub fn registered_characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        if !self.is_running() {
            return None;
        }
        self.service.characteristic(uuid)
    }

    pub async fn start(
        &mut self,
        backend: &mut dyn PeripheralServer,
        log: &EventLog,
    ) -> Result<(), Error> {
        if self.state != GattServerState::Closed {
            let err = Error::redundant(format!("server already {:?}", self.state));
            warn!("start server ignored: {}", err);
            log.append(NewEntry::info("Service already running"));
            return Ok(());
        }

        self.generation += 1;
        let result = match check_radio(backend).await {
            Ok(()) => backend.add_service(&self.service, self.generation).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                for c in &self.service.characteristics {
                    debug!(
                        "service {} characteristic {} properties {:#04x}",
                        self.service.uuid,
                        c.uuid,
                        c.property_mask()
                    );
                }
                self.state = GattServerState::Opening;
                Ok(())
            }
            Err(err) => {
                let err = match err.error_type {
                    ErrorType::PermissionDenied | ErrorType::RadioUnavailable => err,
                    _ => Error::new(
                        "gatt server could not be opened",
                        err.description,
                        ErrorType::ServerOpenFailed,
                    ),
                };
                log.append(NewEntry::error("Service failed to start").detail(err.description.clone()));
                Err(err)
            }
        }
    }

    /// Applies the stack's verdict on the pending registration. Results for
    /// an earlier request are dropped.
    pub async fn on_service_added(
        &mut self,
        generation: u64,
        service: Uuid,
        error: Option<String>,
        backend: &mut dyn PeripheralServer,
        log: &EventLog,
    ) {
        if self.state != GattServerState::Opening
            || generation != self.generation
            || service != self.service.uuid
        {
            debug!(
                "service {} result {} ignored in state {:?} (current request {})",
                service, generation, self.state, self.generation
            );
            return;
        }
        match error {
            None => {
                self.state = GattServerState::Running;
                log.append(
                    NewEntry::info("Service started")
                        .detail(self.service.uuid.to_string())
                        .enhanced(),
                );
            }
            Some(reason) => {
                self.state = GattServerState::Closed;
                if let Err(err) = backend.close_server().await {
                    warn!("closing half-open server failed: {}", err);
                }
                log.append(NewEntry::error("Service failed to start").detail(reason));
            }
        }
    }

    /// Closing a server that never started is a no-op.
    pub async fn close(
        &mut self,
        backend: &mut dyn PeripheralServer,
        log: &EventLog,
    ) -> Result<(), Error> {
        if self.state == GattServerState::Closed {
            warn!("close server ignored: {}", Error::redundant("server not running"));
            log.append(NewEntry::info("Service not running"));
            return Ok(());
        }
        // The registration is released either way.
        self.state = GattServerState::Closed;
        let result = backend.close_server().await;
        match &result {
            Ok(()) => log.append(
                NewEntry::info("Service stopped")
                    .detail(self.service.uuid.to_string())
                    .enhanced(),
            ),
            Err(err) => log.append(NewEntry::error("Service stop failed").detail(err.description.clone())),
        };
        result
    }

    pub async fn on_power_lost(&mut self, backend: &mut dyn PeripheralServer, log: &EventLog) {
        if self.state == GattServerState::Closed {
            return;
        }
        self.state = GattServerState::Closed;
        if let Err(err) = backend.close_server().await {
            warn!("releasing server after power loss failed: {}", err);
        }
        log.append(NewEntry::warning("Service interrupted").detail("radio powered off"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::peripheral_event::PeripheralEvent;
    use crate::peripheral::loopback::LoopbackPeripheral;
    use tokio::sync::mpsc;

    const SERVICE: Uuid = Uuid::from_u128(0x10);
    const CHARACTERISTIC: Uuid = Uuid::from_u128(0x11);

    async fn confirm(
        server: &mut GattServerController,
        rx: &mut mpsc::Receiver<PeripheralEvent>,
        backend: &mut LoopbackPeripheral,
        log: &EventLog,
    ) {
        match rx.recv().await {
            Some(PeripheralEvent::ServiceAdded {
                generation,
                service,
                error,
            }) => {
                server
                    .on_service_added(generation, service, error, backend, log)
                    .await
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_then_start_leaves_one_registration() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let central = backend.central();
        let log = EventLog::unbounded();
        let mut server = GattServerController::new(SERVICE, CHARACTERISTIC, "Hello, World!");

        server.start(&mut backend, &log).await.unwrap();
        confirm(&mut server, &mut rx, &mut backend, &log).await;
        assert!(server.is_running());

        server.close(&mut backend, &log).await.unwrap();
        server.start(&mut backend, &log).await.unwrap();
        confirm(&mut server, &mut rx, &mut backend, &log).await;

        assert!(server.is_running());
        assert_eq!(central.registered_services(), vec![SERVICE]);
        assert_eq!(central.max_registered_services(), 1);
    }

    #[tokio::test]
    async fn close_when_never_started_is_harmless() {
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let log = EventLog::unbounded();
        let mut server = GattServerController::new(SERVICE, CHARACTERISTIC, "x");

        server.close(&mut backend, &log).await.unwrap();
        assert_eq!(server.state(), GattServerState::Closed);
        assert!(log.snapshot().iter().all(|e| !e.is_error()));
    }

    #[tokio::test]
    async fn failed_registration_stays_closed() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        backend.central().fail_next_service("out of handles");
        let log = EventLog::unbounded();
        let mut server = GattServerController::new(SERVICE, CHARACTERISTIC, "x");

        server.start(&mut backend, &log).await.unwrap();
        confirm(&mut server, &mut rx, &mut backend, &log).await;
        assert_eq!(server.state(), GattServerState::Closed);
        assert_eq!(log.snapshot().pop().unwrap().to_string(), "Service failed to start: out of handles");
    }

    #[tokio::test]
    async fn missing_permission_is_reported() {
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        backend.central().set_authorized(false);
        let log = EventLog::unbounded();
        let mut server = GattServerController::new(SERVICE, CHARACTERISTIC, "x");

        let err = server.start(&mut backend, &log).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::PermissionDenied);
        assert_eq!(server.state(), GattServerState::Closed);
    }

    #[tokio::test]
    async fn characteristic_only_visible_while_running() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let log = EventLog::unbounded();
        let mut server = GattServerController::new(SERVICE, CHARACTERISTIC, "x");

        assert!(server.registered_characteristic(CHARACTERISTIC).is_none());
        server.start(&mut backend, &log).await.unwrap();
        confirm(&mut server, &mut rx, &mut backend, &log).await;
        assert!(server.registered_characteristic(CHARACTERISTIC).is_some());
        assert!(server.registered_characteristic(SERVICE).is_none());
    }

    #[tokio::test]
    async fn late_success_does_not_confirm_a_newer_registration() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let central = backend.central();
        let log = EventLog::unbounded();
        let mut server = GattServerController::new(SERVICE, CHARACTERISTIC, "x");

        server.start(&mut backend, &log).await.unwrap();
        server.close(&mut backend, &log).await.unwrap();
        central.fail_next_service("out of handles");
        server.start(&mut backend, &log).await.unwrap();
        assert_eq!(server.generation(), 2);

        confirm(&mut server, &mut rx, &mut backend, &log).await;
        assert_eq!(server.state(), GattServerState::Opening);
        confirm(&mut server, &mut rx, &mut backend, &log).await;
        assert_eq!(server.state(), GattServerState::Closed);
        assert!(central.registered_services().is_empty());
    }
}
