mod characteristic_utils;

use crate::gatt::peripheral_event::{AdvertisingFailure, ConnectionState, PeripheralEvent};
use crate::gatt::service;
use crate::peripheral::advertisement::Advertisement;
use crate::peripheral::PeripheralServer;
use crate::{Error, ErrorType};
use async_trait::async_trait;
use bluer::{
    adv::{self, AdvertisementHandle},
    gatt::local::{Application, ApplicationHandle},
    Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, ErrorKind,
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// BlueZ over D-Bus. Dropping a handle withdraws the advertisement or
/// the GATT application.
pub struct BluezPeripheral {
    adapter: Adapter,
    sender_tx: Sender<PeripheralEvent>,
    request_ids: Arc<AtomicU32>,
    advertisement: Option<AdvertisementHandle>,
    application: Option<ApplicationHandle>,
    connection_watch: Option<JoinHandle<()>>,
}

impl BluezPeripheral {
    pub async fn new(sender_tx: Sender<PeripheralEvent>) -> Result<Self, Error> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!(
            "initialized bluetooth adapter {} with address {}",
            adapter.name(),
            adapter.address().await?
        );
        Ok(BluezPeripheral {
            adapter,
            sender_tx,
            request_ids: Arc::new(AtomicU32::new(1)),
            advertisement: None,
            application: None,
            connection_watch: None,
        })
    }

    // Called from the task that drains the queue; waiting here would deadlock it.
    fn post(&self, event: PeripheralEvent) -> Result<(), Error> {
        self.sender_tx.try_send(event).map_err(|err| {
            error!("error sending peripheral event: {}", err);
            Error::new(
                "tokio::sync::mpsc::error::TrySendError",
                err.to_string(),
                ErrorType::ChannelClosed,
            )
        })
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        if let Some(watch) = self.connection_watch.take() {
            watch.abort();
        }
    }
}

#[async_trait]
impl PeripheralServer for BluezPeripheral {
    async fn is_powered(&self) -> Result<bool, Error> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn is_authorized(&self) -> Result<bool, Error> {
        // Reaching bluetoothd over the system bus is the permission.
        Ok(true)
    }

    async fn start_advertising(
        &mut self,
        advertisement: &Advertisement,
        generation: u64,
    ) -> Result<(), Error> {
        let settings = &advertisement.settings;
        let advertisement_type = if settings.connectable {
            adv::Type::Peripheral
        } else {
            adv::Type::Broadcast
        };
        let le_advertisement = adv::Advertisement {
            advertisement_type,
            service_uuids: advertisement.service_uuids.iter().copied().collect::<BTreeSet<_>>(),
            discoverable: Some(true),
            local_name: advertisement.local_name.clone(),
            tx_power: Some(settings.tx_power.dbm()),
            min_interval: Some(settings.mode.interval()),
            max_interval: Some(settings.mode.interval()),
            ..Default::default()
        };
        match self.adapter.advertise(le_advertisement).await {
            Ok(handle) => {
                debug!("advertisement registered: {:?}", handle);
                self.advertisement = Some(handle);
                if let Err(err) = self.post(PeripheralEvent::AdvertisingStarted {
                    generation,
                    error: None,
                }) {
                    // Nobody will hear about it, so take it back off the air.
                    self.advertisement = None;
                    return Err(err);
                }
            }
            Err(err) => {
                let code = match err.kind {
                    ErrorKind::AlreadyExists => AdvertisingFailure::ALREADY_STARTED,
                    ErrorKind::NotSupported => AdvertisingFailure::FEATURE_UNSUPPORTED,
                    ErrorKind::InvalidLength => AdvertisingFailure::DATA_TOO_LARGE,
                    ErrorKind::NotPermitted | ErrorKind::NotAuthorized => return Err(err.into()),
                    _ => AdvertisingFailure::INTERNAL_ERROR,
                };
                self.post(PeripheralEvent::AdvertisingStarted {
                    generation,
                    error: Some(AdvertisingFailure::new(code, err.message)),
                })?;
            }
        }
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), Error> {
        self.advertisement = None;
        Ok(())
    }

    async fn add_service(
        &mut self,
        service: &service::Service,
        generation: u64,
    ) -> Result<(), Error> {
        let application = Application {
            services: vec![characteristic_utils::parse_service(
                service,
                self.sender_tx.clone(),
                self.request_ids.clone(),
            )],
            ..Default::default()
        };
        let handle = self.adapter.serve_gatt_application(application).await?;
        debug!("gatt application registered: {:?}", handle);
        self.application = Some(handle);
        self.connection_watch = Some(watch_connections(
            self.adapter.clone(),
            self.sender_tx.clone(),
        ));
        if let Err(err) = self.post(PeripheralEvent::ServiceAdded {
            generation,
            service: service.uuid,
            error: None,
        }) {
            self.close_server().await?;
            return Err(err);
        }
        Ok(())
    }

    async fn close_server(&mut self) -> Result<(), Error> {
        if let Some(watch) = self.connection_watch.take() {
            watch.abort();
        }
        self.application = None;
        Ok(())
    }
}

/// Reports `Connected` property changes of every device the adapter knows.
fn watch_connections(adapter: Adapter, sender_tx: Sender<PeripheralEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut adapter_events = match adapter.events().await {
            Ok(events) => Box::pin(events),
            Err(err) => {
                warn!("cannot watch adapter events: {}", err);
                return;
            }
        };
        let mut watched: BTreeSet<Address> = BTreeSet::new();
        let mut device_tasks: Vec<JoinHandle<()>> = Vec::new();
        if let Ok(known) = adapter.device_addresses().await {
            for address in known {
                watched.insert(address);
                device_tasks.push(watch_device(adapter.clone(), address, sender_tx.clone()));
            }
        }
        while let Some(event) = adapter_events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                if watched.insert(address) {
                    device_tasks.push(watch_device(adapter.clone(), address, sender_tx.clone()));
                }
            }
        }
        for task in device_tasks {
            task.abort();
        }
    })
}

fn watch_device(
    adapter: Adapter,
    address: Address,
    sender_tx: Sender<PeripheralEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let device = match adapter.device(address) {
            Ok(device) => device,
            Err(err) => {
                debug!("device {} vanished: {}", address, err);
                return;
            }
        };
        let mut events = match device.events().await {
            Ok(events) => Box::pin(events),
            Err(err) => {
                debug!("cannot watch device {}: {}", address, err);
                return;
            }
        };
        while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
            let DeviceProperty::Connected(connected) = property else {
                continue;
            };
            let name = device.name().await.ok().flatten();
            let state = if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            let event = PeripheralEvent::ConnectionStateChanged {
                client: address.to_string(),
                name,
                state,
            };
            if sender_tx
                .send(event)
                .await
                .is_err()
            {
                return;
            }
        }
    })
}
