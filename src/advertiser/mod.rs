//! Domain advertisement subsystem.
//!
//! # Data Flow
//! ```text
//! system bus (NameOwnerChanged, StateChanged signals)
//!     → avahi.rs bus watcher task
//!     → AdvertiserEvent over an mpsc channel into the advertiser task
//!     → advertiser.rs state machine
//!     → DiscoveryDaemon calls (connect, commit_group, reset_group), each
//!       bounded by the call timeout
//!
//! registration event loop
//!     → AdvertiserHandle::add_domain / remove_domain (watch of the desired set)
//!     → service.rs task applies the latest set (full group rebuild when Registered)
//! ```
//!
//! # States
//! ```text
//! NoServer --appeared--> ServerConnected --running--> Registered
//!    ^                        ^    |                      |
//!    |                        |    +--failure, retry 30s  |
//!    +------disappeared-------+-----------collision-------+
//!                                                         |
//! Fatal <-------------------entry group failure-----------+
//! ```
//!
//! # Design Decisions
//! - The state machine only sees explicit events, so tests drive it with
//!   synthetic ones and a fake daemon
//! - Retries use one fixed interval; the deadline lives in the state machine
//!   and the event loop sleeps until it
//! - Fatal disables advertisement only; HTTP serving is unaffected
//! - The state machine runs in its own task; the registration loop only
//!   publishes the desired set and never waits on the daemon
//! - Intermediate desired sets are coalesced; only the latest is committed

pub mod advertiser;
pub mod avahi;
pub mod daemon;
pub mod encoding;
pub mod service;

use thiserror::Error;

pub use advertiser::{AdvertiserState, DomainAdvertiser, DEFAULT_CALL_TIMEOUT};
pub use avahi::{spawn_bus_watcher, AvahiDaemon};
pub use daemon::{AliasRecord, DetachedDaemon, DiscoveryDaemon};
pub use service::AdvertiserHandle;

/// Record TTL in seconds.
pub const RECORD_TTL_SECS: u32 = 60;

/// Errors talking to the discovery daemon.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdvertiseError {
    /// The bus or daemon call failed; retried later.
    #[error("discovery daemon call failed: {0}")]
    Daemon(String),

    /// No connection to the system bus.
    #[error("system bus unavailable")]
    NoBus,

    /// The daemon did not answer in time; retried later.
    #[error("discovery daemon did not answer {0} in time")]
    Timeout(&'static str),

    #[error("cannot encode domain name {0:?}")]
    InvalidName(String),
}

impl From<zbus::Error> for AdvertiseError {
    fn from(e: zbus::Error) -> Self {
        AdvertiseError::Daemon(e.to_string())
    }
}

impl From<zbus::fdo::Error> for AdvertiseError {
    fn from(e: zbus::fdo::Error) -> Self {
        AdvertiseError::Daemon(e.to_string())
    }
}

/// Discovery daemon server state, as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Invalid,
    Registering,
    Running,
    Collision,
    Failure,
}

impl From<i32> for ServerState {
    fn from(value: i32) -> Self {
        match value {
            1 => ServerState::Registering,
            2 => ServerState::Running,
            3 => ServerState::Collision,
            4 => ServerState::Failure,
            _ => ServerState::Invalid,
        }
    }
}

/// Entry group state, as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryGroupState {
    Uncommitted,
    Registering,
    Established,
    Collision,
    Failure,
}

impl From<i32> for EntryGroupState {
    fn from(value: i32) -> Self {
        match value {
            1 => EntryGroupState::Registering,
            2 => EntryGroupState::Established,
            3 => EntryGroupState::Collision,
            4 => EntryGroupState::Failure,
            _ => EntryGroupState::Uncommitted,
        }
    }
}

/// Inputs to the advertiser state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserEvent {
    /// The daemon acquired its bus name.
    DaemonAppeared,
    /// The daemon lost its bus name.
    DaemonDisappeared,
    ServerStateChanged(ServerState),
    EntryGroupStateChanged(EntryGroupState),
    /// The scheduled retry deadline passed.
    RetryElapsed,
}
