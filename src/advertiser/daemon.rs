//! Discovery daemon interface.

use async_trait::async_trait;

use crate::advertiser::{AdvertiseError, ServerState};

/// One host-alias record: `name` is an alias for the local FQDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    /// ASCII-compatible alias name.
    pub name: String,
    /// Target FQDN in DNS wire format.
    pub rdata: Vec<u8>,
    pub ttl: u32,
}

/// Operations the advertiser needs from a discovery daemon.
///
/// Implementations push asynchronous daemon notifications (server and entry
/// group state changes) into the event loop themselves.
#[async_trait]
pub trait DiscoveryDaemon: Send {
    /// Acquire a server handle and report the daemon's current state.
    async fn connect(&mut self) -> Result<ServerState, AdvertiseError>;

    /// The local machine's fully-qualified host name.
    async fn host_fqdn(&mut self) -> Result<String, AdvertiseError>;

    /// Create a fresh entry group holding `records` and commit it.
    async fn commit_group(&mut self, records: &[AliasRecord]) -> Result<(), AdvertiseError>;

    /// Reset and free the committed group, if any.
    async fn reset_group(&mut self) -> Result<(), AdvertiseError>;

    /// Drop the server handle.
    fn release(&mut self);
}

/// Daemon used when advertisement is disabled or no bus is reachable.
///
/// Every call fails, so the advertiser never leaves `NoServer` on its own.
#[derive(Debug, Default)]
pub struct DetachedDaemon;

#[async_trait]
impl DiscoveryDaemon for DetachedDaemon {
    async fn connect(&mut self) -> Result<ServerState, AdvertiseError> {
        Err(AdvertiseError::NoBus)
    }

    async fn host_fqdn(&mut self) -> Result<String, AdvertiseError> {
        Err(AdvertiseError::NoBus)
    }

    async fn commit_group(&mut self, _records: &[AliasRecord]) -> Result<(), AdvertiseError> {
        Err(AdvertiseError::NoBus)
    }

    async fn reset_group(&mut self) -> Result<(), AdvertiseError> {
        Ok(())
    }

    fn release(&mut self) {}
}
