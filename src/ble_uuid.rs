use crate::error::Error;
use uuid::Uuid;

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

pub trait ShortUuid {
    fn from_short_u16(uuid: u16) -> Uuid;
    fn from_short_u32(uuid: u32) -> Uuid;
}

impl ShortUuid for Uuid {
    fn from_short_u16(uuid: u16) -> Uuid {
        Uuid::from_short_u32(uuid as u32)
    }

    fn from_short_u32(uuid: u32) -> Uuid {
        Uuid::from_u128(BLUETOOTH_BASE_UUID | ((uuid as u128) << 96))
    }
}

/// Parses a UUID in any of the forms BLE stacks hand out.
///
/// Stacks tend to return upper-case strings, only 4 characters long for
/// 16-bit SIG UUIDs and 8 characters long when the rest matches the base UUID.
pub fn parse_ble_uuid(value: &str) -> Result<Uuid, Error> {
    let value = value.trim();
    let long = match value.len() {
        4 | 8 => {
            if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::config(format!("invalid short uuid {value:?}")));
            }
            let short = u32::from_str_radix(value, 16)
                .map_err(|_| Error::config(format!("invalid short uuid {value:?}")))?;
            return Ok(Uuid::from_short_u32(short));
        }
        _ => value.to_lowercase(),
    };
    long.parse()
        .map_err(|_| Error::config(format!("invalid uuid {value:?}")))
}

pub(crate) mod serde_ble_uuid {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(uuid: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(uuid)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_ble_uuid(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms_expand_onto_base_uuid() {
        let heart_rate = "0000180d-0000-1000-8000-00805f9b34fb".parse::<Uuid>().unwrap();
        assert_eq!(Uuid::from_short_u16(0x180D), heart_rate);
        assert_eq!(parse_ble_uuid("180D").unwrap(), heart_rate);
        assert_eq!(parse_ble_uuid("0000180D").unwrap(), heart_rate);
    }

    #[test]
    fn long_form_is_case_insensitive() {
        let upper = parse_ble_uuid("6E400001-B5A3-F393-E0A9-E50E24DCCA9E").unwrap();
        let lower = parse_ble_uuid("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn garbage_is_a_config_error() {
        let err = parse_ble_uuid("zz").unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::Config);
        assert!(parse_ble_uuid("XYZW").is_err());
    }

    #[test]
    fn signed_short_form_is_rejected() {
        assert!(parse_ble_uuid("+12F").is_err());
        assert!(parse_ble_uuid("+000180D").is_err());
        assert!(parse_ble_uuid("012F").is_ok());
    }
}
