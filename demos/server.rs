//! Runs the peripheral end to end.
//!
//! Without the `bluez` feature the stack is the in-process loopback and a
//! simulated phone connects, reads the characteristic and leaves. With
//! `--features bluez` on Linux the real adapter is used until Ctrl-C.
//!
//! Usage: `cargo run --example server [config.json]`
use ble_peripheral_coordinator::ble_uuid::ShortUuid;
use ble_peripheral_coordinator::gatt::peripheral_event::PeripheralEvent;
use ble_peripheral_coordinator::{PeripheralConfig, PeripheralCoordinator};
use log::{error, info};
use tokio::sync::mpsc::{self, Receiver};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = pretty_env_logger::try_init() {
        eprintln!("WARNING: failed to initialize logging framework: {}", err);
    }

    let config = match std::env::args().nth(1) {
        Some(path) => match PeripheralConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                error!("cannot load {}: {}", path, err);
                std::process::exit(1);
            }
        },
        None => PeripheralConfig::new(Uuid::from_short_u16(0x1234), Uuid::from_short_u16(0x2A3D))
            .with_local_name("hello"),
    };

    let (sender_tx, receiver_rx) = mpsc::channel::<PeripheralEvent>(config.event_buffer);
    if let Err(err) = run(config, sender_tx, receiver_rx).await {
        error!("peripheral failed: {}", err);
        std::process::exit(1);
    }
}

#[cfg(not(all(feature = "bluez", target_os = "linux")))]
async fn run(
    config: PeripheralConfig,
    sender_tx: mpsc::Sender<PeripheralEvent>,
    receiver_rx: Receiver<PeripheralEvent>,
) -> Result<(), ble_peripheral_coordinator::Error> {
    use ble_peripheral_coordinator::peripheral::loopback::LoopbackPeripheral;

    let characteristic = config.characteristic_uuid;
    let peripheral = LoopbackPeripheral::new(sender_tx);
    let phone = peripheral.central();
    let coordinator = PeripheralCoordinator::new(config, peripheral, receiver_rx)?;
    let mut log = coordinator.log().subscribe();
    tokio::spawn(async move {
        while let Some(Ok(entry)) = log.next().await {
            println!("[{:?}] {}", entry.severity, entry);
        }
    });

    coordinator.start_gatt_server().await?;
    coordinator.start_advertising().await?;
    coordinator.flush().await?;
    info!("peripheral state: {:?}", coordinator.state());

    phone.connect("Pixel").await;
    if let Some(response) = phone.read("Pixel", characteristic, 0).await {
        info!("phone read {:?}", String::from_utf8_lossy(&response.value));
    }
    phone.disconnect("Pixel").await;
    coordinator.flush().await?;

    coordinator.shutdown().await
}

#[cfg(all(feature = "bluez", target_os = "linux"))]
async fn run(
    config: PeripheralConfig,
    sender_tx: mpsc::Sender<PeripheralEvent>,
    receiver_rx: Receiver<PeripheralEvent>,
) -> Result<(), ble_peripheral_coordinator::Error> {
    use ble_peripheral_coordinator::peripheral::bluez::BluezPeripheral;

    let peripheral = BluezPeripheral::new(sender_tx).await?;
    let coordinator = PeripheralCoordinator::new(config, peripheral, receiver_rx)?;
    let mut log = coordinator.log().subscribe();
    tokio::spawn(async move {
        while let Some(Ok(entry)) = log.next().await {
            println!("[{:?}] {}", entry.severity, entry);
        }
    });

    coordinator.start_gatt_server().await?;
    coordinator.start_advertising().await?;
    info!("serving until ctrl-c");
    let _ = tokio::signal::ctrl_c().await;
    coordinator.shutdown().await
}
