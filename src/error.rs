use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorType {
    #[error("permission denied")]
    PermissionDenied,
    #[error("bluetooth radio unavailable")]
    RadioUnavailable,
    #[error("advertising failed with code {code}")]
    AdvertisingFailed { code: i32 },
    #[error("gatt server could not be opened")]
    ServerOpenFailed,
    #[error("redundant operation")]
    RedundantOperation,
    #[error("channel closed")]
    ChannelClosed,
    #[error("invalid configuration")]
    Config,
    #[cfg(all(feature = "bluez", target_os = "linux"))]
    #[error("bluez")]
    Bluez,
    #[error("unknown")]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}: {description}")]
pub struct Error {
    pub message: String,
    pub description: String,
    pub error_type: ErrorType,
}

impl Error {
    pub fn new(
        message: impl Into<String>,
        description: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Error {
            message: message.into(),
            description: description.into(),
            error_type,
        }
    }

    pub fn from_type(error_type: ErrorType) -> Self {
        Error {
            message: error_type.to_string(),
            description: String::new(),
            error_type,
        }
    }

    pub fn config(description: impl Into<String>) -> Self {
        Error::new("invalid configuration", description, ErrorType::Config)
    }

    /// A start or stop that found the resource already in the wanted state.
    /// Only ever logged, never returned.
    pub fn redundant(description: impl Into<String>) -> Self {
        Error::new("redundant operation", description, ErrorType::RedundantOperation)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::new("serde_json::Error", value.to_string(), ErrorType::Config)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::new("std::io::Error", value.to_string(), ErrorType::Config)
    }
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Error::new(
            "tokio::sync::mpsc::error::SendError",
            "receiver dropped",
            ErrorType::ChannelClosed,
        )
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(_: oneshot::error::RecvError) -> Self {
        Error::new(
            "tokio::sync::oneshot::error::RecvError",
            "sender dropped",
            ErrorType::ChannelClosed,
        )
    }
}

#[cfg(all(feature = "bluez", target_os = "linux"))]
impl From<bluer::Error> for Error {
    fn from(value: bluer::Error) -> Self {
        let error_type = match value.kind {
            bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
                ErrorType::PermissionDenied
            }
            bluer::ErrorKind::NotReady => ErrorType::RadioUnavailable,
            _ => ErrorType::Bluez,
        };
        Error::new(format!("bluer::Error: {:?}", value.kind), value.message, error_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_type_uses_type_as_message() {
        let err = Error::from_type(ErrorType::AdvertisingFailed { code: 3 });
        assert_eq!(err.message, "advertising failed with code 3");
        assert_eq!(err.error_type, ErrorType::AdvertisingFailed { code: 3 });
    }

    #[test]
    fn closed_channel_maps_to_channel_closed() {
        let err = Error::from(mpsc::error::SendError(1u8));
        assert_eq!(err.error_type, ErrorType::ChannelClosed);
    }

    #[test]
    fn redundant_operation_display() {
        let err = Error::redundant("not advertising");
        assert_eq!(err.to_string(), "redundant operation: not advertising");
        assert_eq!(err.error_type, ErrorType::RedundantOperation);
    }
}
