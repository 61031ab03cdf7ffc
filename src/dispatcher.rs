//! Turns platform connection and read-request events into log entries,
//! read responses and advertising policy decisions.
use crate::gatt::characteristic::Characteristic;
use crate::gatt::peripheral_event::{
    ConnectionState, PeripheralRequest, ReadRequestResponse, RequestResponse,
};
use crate::log_sink::{EventLog, NewEntry};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

pub const UNKNOWN_PEER: &str = "Unknown";

/// How connections couple back into advertising. Both default to off:
/// advertising keeps running while a peer is connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPolicy {
    /// Stop advertising when a peer connects (one peer at a time).
    pub stop_advertising_on_connect: bool,
    /// Resume advertising once the last peer disconnects.
    pub resume_advertising_on_disconnect: bool,
}

impl ConnectionPolicy {
    pub fn single_peer() -> Self {
        ConnectionPolicy {
            stop_advertising_on_connect: true,
            resume_advertising_on_disconnect: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    None,
    StopAdvertising,
    ResumeAdvertising,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConnection {
    /// Stable address the stack reports for the peer.
    pub address: String,
    pub name: Option<String>,
    pub state: ConnectionState,
}

impl RemoteConnection {
    /// Name when the peer advertised one, address otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionDispatcher {
    policy: ConnectionPolicy,
    connections: BTreeMap<String, RemoteConnection>,
}

impl ConnectionDispatcher {
    pub fn new(policy: ConnectionPolicy) -> Self {
        ConnectionDispatcher {
            policy,
            connections: BTreeMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Addresses of the connected peers.
    pub fn connected_peers(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn connection(&self, address: &str) -> Option<&RemoteConnection> {
        self.connections.get(address)
    }

    /// Forget every peer, e.g. because the server they were attached to closed.
    pub fn clear(&mut self) {
        self.connections.clear();
    }

    /// Peers are tracked by `client`, their address. `name` only feeds the log.
    pub fn on_connection_state_changed(
        &mut self,
        client: &str,
        name: Option<&str>,
        state: ConnectionState,
        log: &EventLog,
    ) -> PolicyAction {
        let address = match client.trim() {
            "" => UNKNOWN_PEER.to_string(),
            address => address.to_string(),
        };
        let connection = RemoteConnection {
            address: address.clone(),
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            state,
        };
        match state {
            ConnectionState::Connected => {
                log.append(NewEntry::info("Connected").detail(connection.label()));
                if self.connections.insert(address, connection).is_some() {
                    debug!("repeated connect from {}", client);
                }
                if self.policy.stop_advertising_on_connect {
                    PolicyAction::StopAdvertising
                } else {
                    PolicyAction::None
                }
            }
            ConnectionState::Disconnected => {
                // Keep the name the peer connected with.
                let label = match self.connections.get(&address) {
                    Some(known) if connection.name.is_none() => known.label().to_string(),
                    _ => connection.label().to_string(),
                };
                log.append(NewEntry::info("Disconnected").detail(label));
                if self.connections.remove(&address).is_none() {
                    debug!("disconnect from untracked peer {}", address);
                    return PolicyAction::None;
                }
                if self.policy.resume_advertising_on_disconnect && self.connections.is_empty() {
                    PolicyAction::ResumeAdvertising
                } else {
                    PolicyAction::None
                }
            }
        }
    }

    /// Answers a read addressed to `registered`, exactly once.
    ///
    /// A read for anything else is left unanswered here and the stack's
    /// default handling applies when the responder is dropped.
    pub fn on_read_request(
        &self,
        request: &PeripheralRequest,
        request_id: u32,
        offset: u16,
        responder: oneshot::Sender<ReadRequestResponse>,
        registered: Option<&Characteristic>,
        log: &EventLog,
    ) {
        log.append(
            NewEntry::info("Received read request")
                .detail(request.characteristic.to_string().to_uppercase()),
        );
        let characteristic = match registered {
            Some(c) if c.uuid == request.characteristic && c.is_readable() => c,
            Some(c) if c.uuid == request.characteristic => {
                let response = ReadRequestResponse {
                    request_id,
                    offset,
                    value: Vec::new(),
                    response: RequestResponse::RequestNotSupported,
                };
                if responder.send(response).is_err() {
                    warn!("read {} from {} abandoned by the stack", request_id, request.client);
                    return;
                }
                log.append(NewEntry::warning("Rejected read request").detail("not readable"));
                return;
            }
            _ => {
                debug!(
                    "read {} for {} left to platform default",
                    request_id, request.characteristic
                );
                return;
            }
        };

        let response = match characteristic.value_at(offset as usize) {
            Some(value) => ReadRequestResponse {
                request_id,
                offset,
                value: value.to_vec(),
                response: RequestResponse::Success,
            },
            None => ReadRequestResponse {
                request_id,
                offset,
                value: Vec::new(),
                response: RequestResponse::InvalidOffset,
            },
        };
        let entry = match response.response {
            RequestResponse::Success => NewEntry::info("Sent read response")
                .detail(String::from_utf8_lossy(&response.value).into_owned()),
            _ => NewEntry::warning("Rejected read request").detail(format!("offset {}", offset)),
        };
        if responder.send(response).is_err() {
            warn!("read {} from {} abandoned by the stack", request_id, request.client);
            return;
        }
        log.append(entry);
    }

    pub fn on_subscription_update(
        &self,
        request: &PeripheralRequest,
        subscribed: bool,
        log: &EventLog,
    ) {
        let text = if subscribed { "Subscribed" } else { "Unsubscribed" };
        log.append(NewEntry::info(text).detail(request.client.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0x20);
    const CHARACTERISTIC: Uuid = Uuid::from_u128(0x21);

    fn request(characteristic: Uuid) -> PeripheralRequest {
        PeripheralRequest {
            client: "Pixel".to_string(),
            service: SERVICE,
            characteristic,
        }
    }

    #[test]
    fn connect_and_disconnect_each_log_once() {
        let log = EventLog::unbounded();
        let mut dispatcher = ConnectionDispatcher::default();
        let action =
            dispatcher.on_connection_state_changed("Pixel", None, ConnectionState::Connected, &log);
        assert_eq!(action, PolicyAction::None);
        assert!(dispatcher.is_connected());
        dispatcher.on_connection_state_changed("Pixel", None, ConnectionState::Disconnected, &log);
        assert!(!dispatcher.is_connected());

        let lines: Vec<String> = log.snapshot().iter().map(|e| e.to_string()).collect();
        assert_eq!(lines, vec!["Connected: Pixel", "Disconnected: Pixel"]);
    }

    #[test]
    fn nameless_peer_is_unknown() {
        let log = EventLog::unbounded();
        let mut dispatcher = ConnectionDispatcher::default();
        dispatcher.on_connection_state_changed("", None, ConnectionState::Connected, &log);
        assert_eq!(dispatcher.connected_peers(), vec![UNKNOWN_PEER.to_string()]);
    }

    #[test]
    fn peers_sharing_a_name_stay_apart() {
        let log = EventLog::unbounded();
        let mut dispatcher = ConnectionDispatcher::new(ConnectionPolicy::single_peer());
        let a = "AA:BB:CC:00:00:01";
        let b = "AA:BB:CC:00:00:02";
        dispatcher.on_connection_state_changed(a, Some("Pixel 7"), ConnectionState::Connected, &log);
        dispatcher.on_connection_state_changed(b, Some("Pixel 7"), ConnectionState::Connected, &log);
        assert_eq!(dispatcher.connected_peers().len(), 2);

        let action =
            dispatcher.on_connection_state_changed(a, None, ConnectionState::Disconnected, &log);
        assert_eq!(action, PolicyAction::None);
        assert!(dispatcher.is_connected());
        assert_eq!(dispatcher.connection(b).map(|c| c.label()), Some("Pixel 7"));

        let lines: Vec<String> = log.snapshot().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            lines,
            vec!["Connected: Pixel 7", "Connected: Pixel 7", "Disconnected: Pixel 7"]
        );
    }

    #[test]
    fn single_peer_policy_couples_advertising() {
        let log = EventLog::unbounded();
        let mut dispatcher = ConnectionDispatcher::new(ConnectionPolicy::single_peer());
        assert_eq!(
            dispatcher.on_connection_state_changed("a", None, ConnectionState::Connected, &log),
            PolicyAction::StopAdvertising
        );
        dispatcher.on_connection_state_changed("b", None, ConnectionState::Connected, &log);
        assert_eq!(
            dispatcher.on_connection_state_changed("a", None, ConnectionState::Disconnected, &log),
            PolicyAction::None
        );
        assert_eq!(
            dispatcher.on_connection_state_changed("b", None, ConnectionState::Disconnected, &log),
            PolicyAction::ResumeAdvertising
        );
    }

    #[tokio::test]
    async fn matching_read_is_answered_from_offset() {
        let log = EventLog::unbounded();
        let dispatcher = ConnectionDispatcher::default();
        let characteristic = Characteristic::static_readable(CHARACTERISTIC, "Hello, World!");
        let (tx, rx) = oneshot::channel();

        dispatcher.on_read_request(&request(CHARACTERISTIC), 7, 7, tx, Some(&characteristic), &log);
        let response = rx.await.unwrap();
        assert_eq!(response.request_id, 7);
        assert_eq!(response.offset, 7);
        assert_eq!(response.value, b"World!".to_vec());
        assert_eq!(response.response, RequestResponse::Success);
        assert_eq!(log.snapshot().pop().unwrap().to_string(), "Sent read response: World!");
    }

    #[tokio::test]
    async fn read_past_the_end_is_rejected() {
        let log = EventLog::unbounded();
        let dispatcher = ConnectionDispatcher::default();
        let characteristic = Characteristic::static_readable(CHARACTERISTIC, "hi");
        let (tx, rx) = oneshot::channel();

        dispatcher.on_read_request(&request(CHARACTERISTIC), 1, 3, tx, Some(&characteristic), &log);
        let response = rx.await.unwrap();
        assert_eq!(response.response, RequestResponse::InvalidOffset);
        assert!(response.value.is_empty());
    }

    #[tokio::test]
    async fn foreign_read_gets_no_response() {
        let log = EventLog::unbounded();
        let dispatcher = ConnectionDispatcher::default();
        let characteristic = Characteristic::static_readable(CHARACTERISTIC, "hi");
        let (tx, rx) = oneshot::channel();

        dispatcher.on_read_request(&request(SERVICE), 1, 0, tx, Some(&characteristic), &log);
        assert!(rx.await.is_err());
        let lines: Vec<String> = log.snapshot().iter().map(|e| e.to_string()).collect();
        assert_eq!(lines, vec![format!("Received read request: {}", SERVICE.to_string().to_uppercase())]);
    }

    #[tokio::test]
    async fn unreadable_characteristic_is_refused() {
        use crate::gatt::properties::{AttributePermission, CharacteristicProperty};

        let log = EventLog::unbounded();
        let dispatcher = ConnectionDispatcher::default();
        let characteristic = Characteristic::new(
            CHARACTERISTIC,
            vec![CharacteristicProperty::Notify],
            vec![AttributePermission::Readable],
            b"hi".to_vec(),
        );
        let (tx, rx) = oneshot::channel();

        dispatcher.on_read_request(&request(CHARACTERISTIC), 4, 0, tx, Some(&characteristic), &log);
        let response = rx.await.unwrap();
        assert_eq!(response.request_id, 4);
        assert_eq!(response.response, RequestResponse::RequestNotSupported);
        assert!(response.value.is_empty());
        assert_eq!(
            log.snapshot().pop().unwrap().to_string(),
            "Rejected read request: not readable"
        );
    }
}
