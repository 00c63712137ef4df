//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, defaults when absent)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → sections handed to each component's constructor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - No process-wide config state; components get explicit sections

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AdvertiserConfig;
pub use schema::DaemonConfig;
pub use schema::FrontEndConfig;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::PathsConfig;
pub use schema::RegistrationConfig;
pub use schema::{SiteConfig, SiteKind};
