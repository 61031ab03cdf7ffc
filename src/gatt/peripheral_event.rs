use std::fmt;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Events delivered by the platform stack, out of band from the caller.
#[derive(Debug)]
pub enum PeripheralEvent {
    StateUpdate {
        is_powered: bool,
    },
    /// Result of the start request tagged with the same `generation`.
    AdvertisingStarted {
        generation: u64,
        error: Option<AdvertisingFailure>,
    },
    ServiceAdded {
        generation: u64,
        service: Uuid,
        error: Option<String>,
    },
    /// `client` is the peer's stable address; `name` is only for display.
    ConnectionStateChanged {
        client: String,
        name: Option<String>,
        state: ConnectionState,
    },
    CharacteristicSubscriptionUpdate {
        request: PeripheralRequest,
        subscribed: bool,
    },
    ReadRequest {
        request: PeripheralRequest,
        request_id: u32,
        offset: u16,
        responder: oneshot::Sender<ReadRequestResponse>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingFailure {
    pub code: i32,
    pub reason: String,
}

impl AdvertisingFailure {
    pub const DATA_TOO_LARGE: i32 = 1;
    pub const TOO_MANY_ADVERTISERS: i32 = 2;
    pub const ALREADY_STARTED: i32 = 3;
    pub const INTERNAL_ERROR: i32 = 4;
    pub const FEATURE_UNSUPPORTED: i32 = 5;

    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        AdvertisingFailure {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AdvertisingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRequest {
    pub client: String,
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequestResponse {
    pub request_id: u32,
    pub offset: u16,
    pub value: Vec<u8>,
    pub response: RequestResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResponse {
    Success,
    /// The characteristic exists but cannot be read.
    RequestNotSupported,
    InvalidOffset,
}
