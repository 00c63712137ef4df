//! Registration channel subsystem.
//!
//! # Data Flow
//! ```text
//! client (Unix socket, newline-delimited JSON)
//!     → listener.rs: accept, one reader task per connection
//!     → protocol.rs: parse + validate each frame in the reader task
//!     → ChannelEvent over a bounded mpsc channel into the event loop
//!     → channel.rs: per-connection state machine
//!     → FrontEndSupervisor (add/update/remove), then AdvertiserHandle
//! ```
//!
//! # Design Decisions
//! - Reader tasks never touch the store; every mutation happens on the loop
//! - Invalid frames are dropped without closing the connection or replying
//! - A connection's events arrive in the order its frames were written
//! - A full event queue stops readers from reading, which pushes back on
//!   clients through the socket; a semaphore caps open connections

pub mod channel;
pub mod connection;
pub mod listener;
pub mod protocol;

pub use channel::RegistrationChannel;
pub use connection::{ClientState, ConnectionId, RegisteredClient};
pub use listener::{ListenerError, RegistrationListener};
pub use protocol::{parse_frame, ProxyTarget, Registration, ValidationError};

/// What reader tasks report to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A valid frame.
    Message(ConnectionId, Registration),
    /// End of stream or read error.
    Disconnected(ConnectionId),
}
