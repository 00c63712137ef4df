//! Registration wire protocol.
//!
//! One frame is one UTF-8 JSON object terminated by `\n`:
//!
//! ```text
//! {"domain-name":"svc1.local","http-port":8080}
//! {"domain-name":"svc2.local","https-port":8443}
//! ```
//!
//! Only the single-port schema is accepted. A `url-map` key is ignored. When
//! both ports are present both must be valid and `http-port` is used. No reply
//! is ever written back.

use serde_json::{Map, Value};
use thiserror::Error;
use url::Host;

pub const DOMAIN_NAME_KEY: &str = "domain-name";
pub const HTTP_PORT_KEY: &str = "http-port";
pub const HTTPS_PORT_KEY: &str = "https-port";

/// Why a frame was dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Not UTF-8, not JSON, or not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value}")]
    InvalidPort { field: &'static str, value: String },

    #[error("invalid domain name {0:?}")]
    InvalidDomain(String),
}

impl ValidationError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) => "malformed",
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidPort { .. } => "invalid_port",
            ValidationError::InvalidDomain(_) => "invalid_domain",
        }
    }
}

/// Where a registered domain is forwarded to on the loopback interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyTarget {
    Http(u16),
    Https(u16),
}

impl ProxyTarget {
    pub fn upstream_url(&self) -> String {
        match self {
            ProxyTarget::Http(port) => format!("http://127.0.0.1:{}/", port),
            ProxyTarget::Https(port) => format!("https://127.0.0.1:{}/", port),
        }
    }
}

/// A validated registration message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// ASCII-compatible (punycode, lowercase) form of the requested name.
    pub domain_name: String,
    pub target: ProxyTarget,
}

/// Parse one frame, without its trailing newline.
pub fn parse_frame(frame: &[u8]) -> Result<Registration, ValidationError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let value: Value = serde_json::from_str(text.trim_end_matches('\r'))
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ValidationError::Malformed("expected a JSON object".into()));
    };

    let domain_name = match object.get(DOMAIN_NAME_KEY) {
        Some(Value::String(name)) if !name.trim().is_empty() => normalize_domain(name.trim())?,
        _ => return Err(ValidationError::MissingField(DOMAIN_NAME_KEY)),
    };

    let http = port_field(&object, HTTP_PORT_KEY)?;
    let https = port_field(&object, HTTPS_PORT_KEY)?;
    let target = match (http, https) {
        (Some(port), _) => ProxyTarget::Http(port),
        (None, Some(port)) => ProxyTarget::Https(port),
        (None, None) => return Err(ValidationError::MissingField(HTTP_PORT_KEY)),
    };

    Ok(Registration {
        domain_name,
        target,
    })
}

fn port_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<u16>, ValidationError> {
    let Some(value) = object.get(field) else {
        return Ok(None);
    };
    value
        .as_u64()
        .filter(|port| (1..=u64::from(u16::MAX)).contains(port))
        .map(|port| Some(port as u16))
        .ok_or_else(|| ValidationError::InvalidPort {
            field,
            value: value.to_string(),
        })
}

/// Convert a domain name to its ASCII-compatible form.
pub fn normalize_domain(name: &str) -> Result<String, ValidationError> {
    match Host::parse(name) {
        Ok(Host::Domain(ascii)) if !ascii.is_empty() => Ok(ascii),
        _ => Err(ValidationError::InvalidDomain(name.to_string())),
    }
}
