/// Composed state of the peripheral across advertising, server and peers.
///
/// Advertising and the GATT server are independent axes; once the server
/// runs, the state reports serving regardless of advertising.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeripheralState {
    #[default]
    Idle,
    Advertising,
    Serving,
    ConnectedServing,
}

impl PeripheralState {
    pub fn derive(is_advertising: bool, is_gatt_server_running: bool, has_peers: bool) -> Self {
        match (is_gatt_server_running, has_peers, is_advertising) {
            (true, true, _) => PeripheralState::ConnectedServing,
            (true, false, _) => PeripheralState::Serving,
            (false, _, true) => PeripheralState::Advertising,
            (false, _, false) => PeripheralState::Idle,
        }
    }
}

/// What an observer of the coordinator gets to see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralStatus {
    pub is_advertising: bool,
    pub is_gatt_server_running: bool,
    pub state: PeripheralState,
    pub connected_peers: Vec<String>,
}
