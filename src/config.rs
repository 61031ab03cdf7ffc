use crate::ble_uuid::serde_ble_uuid;
use crate::dispatcher::ConnectionPolicy;
use crate::error::Error;
use crate::gatt::characteristic::Characteristic;
use crate::gatt::service::Service;
use crate::peripheral::advertisement::{AdvertiseSettings, Advertisement};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub const DEFAULT_VALUE: &str = "Hello, World!";
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralConfig {
    #[serde(with = "serde_ble_uuid")]
    pub service_uuid: Uuid,
    #[serde(with = "serde_ble_uuid")]
    pub characteristic_uuid: Uuid,
    #[serde(default = "default_value")]
    pub value: String,
    #[serde(default)]
    pub local_name: Option<String>,
    #[serde(default)]
    pub advertising: AdvertiseSettings,
    #[serde(default)]
    pub connection_policy: ConnectionPolicy,
    #[serde(default)]
    pub log_capacity: Option<usize>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_value() -> String {
    DEFAULT_VALUE.to_string()
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl PeripheralConfig {
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        PeripheralConfig {
            service_uuid,
            characteristic_uuid,
            value: default_value(),
            local_name: None,
            advertising: AdvertiseSettings::default(),
            connection_policy: ConnectionPolicy::default(),
            log_capacity: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_connection_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.connection_policy = policy;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = Some(capacity);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: PeripheralConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        PeripheralConfig::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.service_uuid == self.characteristic_uuid {
            return Err(Error::config(
                "service and characteristic uuids must differ",
            ));
        }
        if self.event_buffer == 0 {
            return Err(Error::config("event_buffer must be greater than zero"));
        }
        if self.log_capacity == Some(0) {
            return Err(Error::config("log_capacity must be greater than zero"));
        }
        Ok(())
    }

    /// The one service this peripheral exposes.
    pub fn service(&self) -> Service {
        Service::new(
            self.service_uuid,
            true,
            vec![Characteristic::static_readable(
                self.characteristic_uuid,
                self.value.as_bytes(),
            )],
        )
    }

    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            local_name: self.local_name.clone(),
            service_uuids: vec![self.service_uuid],
            settings: self.advertising.clone(),
        }
    }
}
