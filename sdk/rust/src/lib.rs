//! Client library for the vhost registrar.
//!
//! ```no_run
//! use registrar_sdk::{Registration, RegistrarClient, DEFAULT_SOCKET_PATH};
//!
//! # async fn demo() -> Result<(), registrar_sdk::ClientError> {
//! let mut client = RegistrarClient::connect(DEFAULT_SOCKET_PATH).await?;
//! client.register(&Registration::http("svc1.local", 8080)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! A registration lives as long as its connection. [`PersistentClient`]
//! keeps one alive across daemon restarts.

pub mod client;

pub use client::{
    ClientError, PersistentClient, RegistrarClient, Registration, DEFAULT_RETRY_INTERVAL,
    DEFAULT_SOCKET_PATH,
};
