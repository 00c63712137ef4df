//! Front-end (httpd) supervision subsystem.
//!
//! # Data Flow
//! ```text
//! store mutation (add/update/remove/remove_batch)
//!     → supervisor.rs (exactly one reconfigure per mutation)
//!     → render.rs (base modules + merged fragments → document)
//!     → temp file + rename (readers never see a partial file)
//!     → process.rs reload() (SIGUSR1 only inside the httpd adapter)
//!
//! Bring-up:
//!     write document → spawn → readiness.rs polls ip:port
//! ```
//!
//! # Design Decisions
//! - The supervisor owns the ConfigStore, so no mutation can skip reconciliation
//! - Reconfigure before start() is a no-op; start() writes the first document
//! - A crashed front end is reported, never restarted

pub mod process;
pub mod readiness;
pub mod render;
pub mod supervisor;

use std::time::Duration;

use thiserror::Error;

use crate::fragments::StoreError;

pub use process::{FrontEndProcess, HttpdProcess, ProcessState};
pub use supervisor::{FrontEndHandle, FrontEndSupervisor};

/// Errors from front-end supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The process exited before it started listening.
    #[error("front end exited during startup (exit code {code:?})")]
    StartupFailed { code: Option<i32> },

    /// The process was still alive but not listening when the deadline passed.
    #[error("front end not listening after {0:?}")]
    StartupTimeout(Duration),

    #[error("front end already running")]
    AlreadyRunning,

    #[error("front end not running")]
    NotRunning,

    #[error("failed to send {signal} to front end: {reason}")]
    Signal { signal: &'static str, reason: String },

    #[error("invalid listen address {0:?}")]
    InvalidListenAddress(String),
}

impl SupervisorError {
    /// True when the error comes from conflicting fragment dependencies.
    pub fn is_dependency_conflict(&self) -> bool {
        matches!(self, SupervisorError::Store(StoreError::DependencyConflict { .. }))
    }
}
