//! Connection identity and per-connection registration state.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and fragment naming
//! - Track whether a connection currently owns a fragment

use std::sync::atomic::{AtomicU64, Ordering};

use crate::registration::protocol::Registration;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough since only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a registration connection.
///
/// IDs are never reused within one daemon run, unlike descriptor numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The fragment id this connection registers under.
    pub fn fragment_id(&self) -> String {
        format!("proxy-{}", self.0)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registration state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, nothing stored yet.
    Unregistered,
    /// Owns exactly one fragment built from this registration.
    Registered(Registration),
}

/// Record kept for each open connection.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub connection_id: ConnectionId,
    pub fragment_id: String,
    pub state: ClientState,
}

impl RegisteredClient {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            fragment_id: connection_id.fragment_id(),
            state: ClientState::Unregistered,
        }
    }

    /// Fragment id, if a fragment is currently stored for this connection.
    pub fn active_fragment(&self) -> Option<&str> {
        match self.state {
            ClientState::Registered(_) => Some(&self.fragment_id),
            ClientState::Unregistered => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert_ne!(id1.fragment_id(), id2.fragment_id());
    }

    #[test]
    fn new_client_has_no_active_fragment() {
        let client = RegisteredClient::new(ConnectionId::new());
        assert!(client.active_fragment().is_none());
        assert!(client.fragment_id.starts_with("proxy-"));
    }
}
