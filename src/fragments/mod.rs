//! Configuration fragments and the fragment store.
//!
//! # Data Flow
//! ```text
//! registration message / static site
//!     → producer.rs (FragmentProducer renders a ConfigFragment)
//!     → store.rs (ConfigStore keeps fragments in insertion order)
//!     → ConfigStore::merge (concatenated text + unified module table)
//!     → frontend supervisor renders the full document
//! ```
//!
//! # Design Decisions
//! - Fragment text is opaque; the store never parses it
//! - Merge order is insertion order, so output is deterministic
//! - Two fragments asking for different files under one module name is a
//!   hard error, never silently resolved

pub mod fragment;
pub mod producer;
pub mod store;

pub use fragment::{ConfigFragment, ModuleDeps};
pub use producer::{FragmentProducer, ReverseProxyProducer};
pub use store::{ConfigStore, MergedConfig, StoreError};
