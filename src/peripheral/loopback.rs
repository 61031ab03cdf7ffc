//! In-process stand-in for the platform Bluetooth stack.
//!
//! [`LoopbackPeripheral`] implements [`PeripheralServer`] against shared
//! in-memory state, and [`LoopbackCentral`] plays the remote side: it
//! connects, reads, subscribes and injects radio or permission faults.
//! Both report through the same event sender, like a real stack would.
//!
//! Results of `start_advertising` and `add_service` are posted without
//! waiting, since the caller is usually the task draining the queue. If
//! the queue is full the result is lost and counted in
//! [`LoopbackCentral::dropped_events`]; the controller waiting on it stays
//! pending until the next stop or close. Size the channel above the number
//! of events a test leaves unconsumed.
use super::advertisement::Advertisement;
use super::PeripheralServer;
use crate::gatt::peripheral_event::{
    AdvertisingFailure, ConnectionState, PeripheralEvent, PeripheralRequest, ReadRequestResponse,
};
use crate::gatt::service::Service;
use crate::{Error, ErrorType};
use async_trait::async_trait;
use log::{debug, error, trace, warn};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug)]
struct LoopbackState {
    powered: bool,
    authorized: bool,
    advertisement: Option<Advertisement>,
    advertising_requests: usize,
    services: Vec<Service>,
    max_registered_services: usize,
    connected: BTreeSet<String>,
    fail_next_advertising: Option<AdvertisingFailure>,
    fail_next_service: Option<String>,
    next_request_id: u32,
    dropped_events: usize,
}

impl Default for LoopbackState {
    fn default() -> Self {
        LoopbackState {
            powered: true,
            authorized: true,
            advertisement: None,
            advertising_requests: 0,
            services: Vec::new(),
            max_registered_services: 0,
            connected: BTreeSet::new(),
            fail_next_advertising: None,
            fail_next_service: None,
            next_request_id: 1,
            dropped_events: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Shared {
    state: Arc<Mutex<LoopbackState>>,
    sender_tx: mpsc::Sender<PeripheralEvent>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The coordinator may be the caller, so never wait on its own queue.
    fn post(&self, event: PeripheralEvent) {
        if let Err(err) = self.sender_tx.try_send(event) {
            self.state().dropped_events += 1;
            error!("loopback dropped platform event: {}", err);
        }
    }
}

#[derive(Debug)]
pub struct LoopbackPeripheral {
    shared: Shared,
}

impl LoopbackPeripheral {
    pub fn new(sender_tx: mpsc::Sender<PeripheralEvent>) -> Self {
        LoopbackPeripheral {
            shared: Shared {
                state: Arc::new(Mutex::new(LoopbackState::default())),
                sender_tx,
            },
        }
    }

    /// Handle for driving the remote side of this stack.
    pub fn central(&self) -> LoopbackCentral {
        LoopbackCentral {
            shared: self.shared.clone(),
        }
    }

    fn check_radio(&self) -> Result<(), Error> {
        let state = self.shared.state();
        if !state.authorized {
            return Err(Error::new(
                "loopback",
                "bluetooth permission not granted",
                ErrorType::PermissionDenied,
            ));
        }
        if !state.powered {
            return Err(Error::new(
                "loopback",
                "bluetooth radio is powered off",
                ErrorType::RadioUnavailable,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PeripheralServer for LoopbackPeripheral {
    async fn is_powered(&self) -> Result<bool, Error> {
        Ok(self.shared.state().powered)
    }

    async fn is_authorized(&self) -> Result<bool, Error> {
        Ok(self.shared.state().authorized)
    }

    async fn start_advertising(
        &mut self,
        advertisement: &Advertisement,
        generation: u64,
    ) -> Result<(), Error> {
        self.check_radio()?;
        let outcome = {
            let mut state = self.shared.state();
            state.advertising_requests += 1;
            if state.advertisement.is_some() {
                Some(AdvertisingFailure::new(
                    AdvertisingFailure::ALREADY_STARTED,
                    "advertising already started",
                ))
            } else if let Some(failure) = state.fail_next_advertising.take() {
                Some(failure)
            } else {
                state.advertisement = Some(advertisement.clone());
                None
            }
        };
        trace!("loopback advertising request {} -> {:?}", generation, outcome);
        self.shared.post(PeripheralEvent::AdvertisingStarted {
            generation,
            error: outcome,
        });
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), Error> {
        self.shared.state().advertisement = None;
        Ok(())
    }

    async fn add_service(&mut self, service: &Service, generation: u64) -> Result<(), Error> {
        self.check_radio()?;
        let error = {
            let mut state = self.shared.state();
            if state.services.iter().any(|s| s.uuid == service.uuid) {
                Some(format!("service {} already registered", service.uuid))
            } else if let Some(reason) = state.fail_next_service.take() {
                Some(reason)
            } else {
                state.services.push(service.clone());
                state.max_registered_services =
                    state.max_registered_services.max(state.services.len());
                None
            }
        };
        self.shared.post(PeripheralEvent::ServiceAdded {
            generation,
            service: service.uuid,
            error,
        });
        Ok(())
    }

    async fn close_server(&mut self) -> Result<(), Error> {
        let mut state = self.shared.state();
        state.services.clear();
        state.connected.clear();
        Ok(())
    }
}

/// Remote side of a [`LoopbackPeripheral`].
#[derive(Debug, Clone)]
pub struct LoopbackCentral {
    shared: Shared,
}

impl LoopbackCentral {
    pub async fn set_powered(&self, powered: bool) {
        {
            let mut state = self.shared.state();
            state.powered = powered;
            if !powered {
                state.advertisement = None;
            }
        }
        self.send(PeripheralEvent::StateUpdate {
            is_powered: powered,
        })
        .await;
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.shared.state().authorized = authorized;
    }

    pub fn fail_next_advertising(&self, code: i32, reason: &str) {
        self.shared.state().fail_next_advertising = Some(AdvertisingFailure::new(code, reason));
    }

    pub fn fail_next_service(&self, reason: &str) {
        self.shared.state().fail_next_service = Some(reason.to_string());
    }

    /// Connects a peer without a name; `peer` is its address.
    /// Returns false when no server is open.
    pub async fn connect(&self, peer: &str) -> bool {
        self.connect_as(peer, None).await
    }

    /// Connects the peer at `address`, reporting `name` as its device name.
    pub async fn connect_named(&self, address: &str, name: &str) -> bool {
        self.connect_as(address, Some(name)).await
    }

    async fn connect_as(&self, address: &str, name: Option<&str>) -> bool {
        {
            let mut state = self.shared.state();
            if state.services.is_empty() {
                debug!("loopback connect from {} ignored: no gatt server", address);
                return false;
            }
            state.connected.insert(address.to_string());
        }
        self.send(PeripheralEvent::ConnectionStateChanged {
            client: address.to_string(),
            name: name.map(str::to_string),
            state: ConnectionState::Connected,
        })
        .await;
        true
    }

    pub async fn disconnect(&self, address: &str) -> bool {
        if !self.shared.state().connected.remove(address) {
            return false;
        }
        self.send(PeripheralEvent::ConnectionStateChanged {
            client: address.to_string(),
            name: None,
            state: ConnectionState::Disconnected,
        })
        .await;
        true
    }

    /// Issues a read and waits for the answer.
    ///
    /// `None` means the request was left to the stack's default handling,
    /// which on a real central ends in an ATT timeout.
    pub async fn read(
        &self,
        peer: &str,
        characteristic: Uuid,
        offset: u16,
    ) -> Option<ReadRequestResponse> {
        let (request, request_id) = {
            let mut state = self.shared.state();
            let service = state
                .services
                .iter()
                .find(|s| s.characteristic(characteristic).is_some())
                .or_else(|| state.services.first())?
                .uuid;
            let request_id = state.next_request_id;
            state.next_request_id = state.next_request_id.wrapping_add(1);
            (
                PeripheralRequest {
                    client: peer.to_string(),
                    service,
                    characteristic,
                },
                request_id,
            )
        };
        let (responder, response) = oneshot::channel();
        self.send(PeripheralEvent::ReadRequest {
            request,
            request_id,
            offset,
            responder,
        })
        .await;
        response.await.ok()
    }

    pub async fn set_subscribed(&self, peer: &str, characteristic: Uuid, subscribed: bool) {
        let service = match self.shared.state().services.first() {
            Some(service) => service.uuid,
            None => return,
        };
        self.send(PeripheralEvent::CharacteristicSubscriptionUpdate {
            request: PeripheralRequest {
                client: peer.to_string(),
                service,
                characteristic,
            },
            subscribed,
        })
        .await;
    }

    pub fn advertisement(&self) -> Option<Advertisement> {
        self.shared.state().advertisement.clone()
    }

    pub fn active_advertisements(&self) -> usize {
        usize::from(self.shared.state().advertisement.is_some())
    }

    pub fn advertising_requests(&self) -> usize {
        self.shared.state().advertising_requests
    }

    pub fn registered_services(&self) -> Vec<Uuid> {
        self.shared.state().services.iter().map(|s| s.uuid).collect()
    }

    /// Results the stack could not queue because the channel was full.
    pub fn dropped_events(&self) -> usize {
        self.shared.state().dropped_events
    }

    /// Highest number of services that were ever registered at once.
    pub fn max_registered_services(&self) -> usize {
        self.shared.state().max_registered_services
    }

    async fn send(&self, event: PeripheralEvent) {
        if let Err(err) = self.shared.sender_tx.send(event).await {
            warn!("loopback central could not deliver event: {}", err);
        }
    }
}
