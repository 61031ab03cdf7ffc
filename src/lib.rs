//! Lifecycle coordinator for a single-service BLE peripheral.
//!
//! A [`PeripheralCoordinator`] owns the radio on behalf of one caller: it
//! starts and stops advertising, registers one service with one readable
//! characteristic, answers reads against it and reports everything that
//! happens to an [`EventLog`]. The Bluetooth stack itself sits behind the
//! [`PeripheralServer`] trait.
//!
//! ```no_run
//! use ble_peripheral_coordinator::{
//!     ble_uuid::ShortUuid, peripheral::loopback::LoopbackPeripheral, PeripheralConfig,
//!     PeripheralCoordinator,
//! };
//! use tokio::sync::mpsc;
//! use uuid::Uuid;
//!
//! # async fn run() -> Result<(), ble_peripheral_coordinator::Error> {
//! let config = PeripheralConfig::new(Uuid::from_short_u16(0x1234), Uuid::from_short_u16(0x2A3D));
//! let (sender_tx, receiver_rx) = mpsc::channel(config.event_buffer);
//! let coordinator =
//!     PeripheralCoordinator::new(config, LoopbackPeripheral::new(sender_tx), receiver_rx)?;
//! coordinator.start_gatt_server().await?;
//! coordinator.start_advertising().await?;
//! # Ok(())
//! # }
//! ```
pub mod advertising;
pub mod ble_uuid;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod gatt;
pub mod gatt_server;
pub mod log_sink;
pub mod peripheral;
pub mod response_channel;
pub mod state;

pub use config::PeripheralConfig;
pub use coordinator::PeripheralCoordinator;
pub use dispatcher::ConnectionPolicy;
pub use error::{Error, ErrorType};
pub use log_sink::{EventLog, LogEntry, Severity};
pub use peripheral::PeripheralServer;
pub use state::{PeripheralState, PeripheralStatus};
