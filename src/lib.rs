//! Dynamic virtual-host registration daemon library.

pub mod advertiser;
pub mod config;
pub mod fragments;
pub mod frontend;
pub mod lifecycle;
pub mod observability;
pub mod registration;
pub mod sites;

pub use config::DaemonConfig;
pub use lifecycle::{DaemonError, Orchestrator, Shutdown};
