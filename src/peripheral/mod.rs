pub mod advertisement;
#[cfg(all(feature = "bluez", target_os = "linux"))]
pub mod bluez;
pub mod loopback;

use crate::gatt::service::Service;
use crate::Error;
use advertisement::Advertisement;
use async_trait::async_trait;

/// The host platform's Bluetooth stack as seen by the coordinator.
///
/// Calls only hand a request to the stack. Whether advertising actually
/// started or a service was actually registered arrives later as a
/// [`PeripheralEvent`](crate::gatt::peripheral_event::PeripheralEvent) on the
/// sender the backend was built with, carrying the `generation` of the call
/// it answers. An `Err` from a call means the stack refused the request
/// outright.
///
/// Calls run on the task that drains the event queue, so a backend must
/// never wait for room on it.
#[async_trait]
pub trait PeripheralServer: Send + Sync {
    async fn is_powered(&self) -> Result<bool, Error>;

    async fn is_authorized(&self) -> Result<bool, Error>;

    async fn start_advertising(
        &mut self,
        advertisement: &Advertisement,
        generation: u64,
    ) -> Result<(), Error>;

    async fn stop_advertising(&mut self) -> Result<(), Error>;

    async fn add_service(&mut self, service: &Service, generation: u64) -> Result<(), Error>;

    /// Removes every registered service and closes the server.
    async fn close_server(&mut self) -> Result<(), Error>;
}
