use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    LowPower,
    #[default]
    Balanced,
    LowLatency,
}

impl AdvertiseMode {
    /// Advertising interval the mode maps to on the air.
    pub fn interval(self) -> Duration {
        match self {
            AdvertiseMode::LowPower => Duration::from_millis(1000),
            AdvertiseMode::Balanced => Duration::from_millis(250),
            AdvertiseMode::LowLatency => Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    #[default]
    Medium,
    High,
}

impl TxPowerLevel {
    pub fn dbm(self) -> i16 {
        match self {
            TxPowerLevel::UltraLow => -21,
            TxPowerLevel::Low => -15,
            TxPowerLevel::Medium => -7,
            TxPowerLevel::High => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
    pub tx_power: TxPowerLevel,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        AdvertiseSettings {
            mode: AdvertiseMode::Balanced,
            connectable: true,
            tx_power: TxPowerLevel::Medium,
        }
    }
}

/// What goes on the air when advertising starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub settings: AdvertiseSettings,
}
