//! Connection state and diagnostic snapshot.

use serde::{Deserialize, Serialize};

/// State of the persistent channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Snapshot of bridge health for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeHealth {
    pub state: ConnectionState,
    /// Number of channels opened so far; bumps on every reconnect.
    pub generation: u64,
    /// Connect attempts made, successful or not.
    pub connect_attempts: u64,
    pub listeners: usize,
    pub hooks: usize,
    pub version: &'static str,
}
