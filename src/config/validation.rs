//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid)
//! - Detect duplicate site ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::config::schema::DaemonConfig;
use crate::registration::protocol::normalize_domain;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let paths = [
        ("paths.run_dir", config.paths.run_dir.as_path()),
        ("paths.tmp_dir", config.paths.tmp_dir.as_path()),
        ("paths.log_dir", config.paths.log_dir.as_path()),
        ("paths.socket_path", config.paths.socket_path.as_path()),
        ("paths.pid_file", config.paths.pid_file.as_path()),
        ("frontend.binary", config.frontend.binary.as_path()),
        ("frontend.modules_dir", config.frontend.modules_dir.as_path()),
    ];
    for (field, path) in paths {
        check_absolute(&mut errors, field, path);
    }

    if config.frontend.listen_ip.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "frontend.listen_ip",
            format!("{:?} is not an IP address", config.frontend.listen_ip),
        ));
    }
    if config.frontend.http_port == 0 {
        errors.push(ValidationError::new("frontend.http_port", "must be non-zero"));
    }
    if config.frontend.probe_interval_ms == 0 {
        errors.push(ValidationError::new("frontend.probe_interval_ms", "must be non-zero"));
    }
    if config.frontend.startup_timeout_ms < config.frontend.probe_interval_ms {
        errors.push(ValidationError::new(
            "frontend.startup_timeout_ms",
            "must not be shorter than the probe interval",
        ));
    }
    if config.registration.max_frame_bytes == 0 {
        errors.push(ValidationError::new("registration.max_frame_bytes", "must be non-zero"));
    }
    if config.registration.max_connections == 0 {
        errors.push(ValidationError::new("registration.max_connections", "must be non-zero"));
    }
    if config.registration.queue_depth == 0 {
        errors.push(ValidationError::new("registration.queue_depth", "must be non-zero"));
    }
    if config.advertiser.call_timeout_ms == 0 {
        errors.push(ValidationError::new("advertiser.call_timeout_ms", "must be non-zero"));
    }
    if config.advertiser.retry_secs == 0 {
        errors.push(ValidationError::new("advertiser.retry_secs", "must be non-zero"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut seen = HashSet::new();
    for (i, site) in config.sites.iter().enumerate() {
        let field = format!("sites[{}]", i);
        if site.id.is_empty() || site.id.contains('/') {
            errors.push(ValidationError::new(
                format!("{}.id", field),
                "must be a non-empty name without '/'",
            ));
        } else if !seen.insert(site.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", field),
                format!("duplicate site id {:?}", site.id),
            ));
        }
        if normalize_domain(&site.domain_name).is_err() {
            errors.push(ValidationError::new(
                format!("{}.domain_name", field),
                format!("{:?} is not a valid domain name", site.domain_name),
            ));
        }
        check_absolute(&mut errors, &format!("{}.root", field), site.kind.root());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_absolute(errors: &mut Vec<ValidationError>, field: &str, path: &Path) {
    if !path.is_absolute() {
        errors.push(ValidationError::new(
            field,
            format!("{} is not an absolute path", path.display()),
        ));
    }
}
