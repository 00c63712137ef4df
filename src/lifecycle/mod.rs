//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (orchestrator.rs):
//!     pid file → sites → front end listening → registration socket
//!
//! Event loop (orchestrator.rs):
//!     accept | channel event | exit poll
//!     (the advertiser runs in its own task and only receives the desired set)
//!
//! Shutdown (orchestrator.rs):
//!     close socket → batch-remove client fragments → stop front end
//!     → stop advertiser → stop sites → remove pid file
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → loop exits
//! ```
//!
//! # Design Decisions
//! - One task owns registration and front-end state; readers only send events
//! - Nothing on the loop waits on the discovery daemon
//! - A failed startup step tears down whatever already came up
//! - Reconcile errors are logged and never end the loop

pub mod orchestrator;
pub mod shutdown;
pub mod signals;

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::frontend::SupervisorError;
use crate::registration::ListenerError;
use crate::sites::SiteError;

pub use orchestrator::Orchestrator;
pub use shutdown::Shutdown;

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("front end: {0}")]
    FrontEnd(#[from] SupervisorError),

    #[error("registration socket: {0}")]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Site(#[from] SiteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon not started")]
    NotStarted,
}
