//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from the TOML file.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Root configuration for the registrar daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Runtime, temporary and log locations.
    pub paths: PathsConfig,

    /// Front-end (httpd) process settings.
    pub frontend: FrontEndConfig,

    /// Registration socket settings.
    pub registration: RegistrationConfig,

    /// Domain advertisement settings.
    pub advertiser: AdvertiserConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Statically configured sites.
    pub sites: Vec<SiteConfig>,
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Transient runtime directory (socket, pid file).
    pub run_dir: PathBuf,

    /// Transient scratch directory (generated config, virtual roots).
    pub tmp_dir: PathBuf,

    /// Persistent log directory for the front end.
    pub log_dir: PathBuf,

    /// Registration socket path.
    pub socket_path: PathBuf,

    /// Daemon pid file.
    pub pid_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("/run/vhost-registrar"),
            tmp_dir: PathBuf::from("/tmp/vhost-registrar"),
            log_dir: PathBuf::from("/var/log/vhost-registrar"),
            socket_path: PathBuf::from("/run/vhost-registrar/api.socket"),
            pid_file: PathBuf::from("/run/vhost-registrar/vhost-registrar.pid"),
        }
    }
}

impl PathsConfig {
    /// Generated front-end configuration file.
    pub fn frontend_config(&self) -> PathBuf {
        self.tmp_dir.join("httpd.conf")
    }

    /// Default virtual root served for unknown hosts.
    pub fn frontend_root(&self) -> PathBuf {
        self.tmp_dir.join("httpd.root")
    }

    pub fn frontend_pid_file(&self) -> PathBuf {
        self.tmp_dir.join("httpd.pid")
    }

    /// Scratch directory for one static site.
    pub fn site_dir(&self, site_id: &str) -> PathBuf {
        self.tmp_dir.join("sites").join(site_id)
    }
}

/// Front-end process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrontEndConfig {
    /// httpd executable.
    pub binary: PathBuf,

    /// Directory module locators are resolved against.
    pub modules_dir: PathBuf,

    /// Address the front end listens on.
    pub listen_ip: String,

    /// Port the front end listens on.
    pub http_port: u16,

    /// Readiness poll interval in milliseconds.
    pub probe_interval_ms: u64,

    /// Readiness deadline in milliseconds.
    pub startup_timeout_ms: u64,

    /// Time allowed for a graceful stop before the process is killed.
    pub stop_grace_secs: u64,

    /// Modules every generated document loads, in order.
    pub base_modules: IndexMap<String, String>,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        let base_modules = [
            ("log_config_module", "mod_log_config.so"),
            ("unixd_module", "mod_unixd.so"),
            ("alias_module", "mod_alias.so"),
            ("authz_core_module", "mod_authz_core.so"),
            ("autoindex_module", "mod_autoindex.so"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            binary: PathBuf::from("/usr/sbin/apache2"),
            modules_dir: PathBuf::from("/usr/lib64/apache2/modules"),
            listen_ip: "0.0.0.0".to_string(),
            http_port: 80,
            probe_interval_ms: 100,
            startup_timeout_ms: 10_000,
            stop_grace_secs: 10,
            base_modules,
        }
    }
}

impl FrontEndConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Address used for readiness probing.
    ///
    /// A wildcard listen address is probed through loopback.
    pub fn probe_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.listen_ip.parse().ok()?;
        let ip = if ip.is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            ip
        };
        Some(SocketAddr::new(ip, self.http_port))
    }
}

/// Registration socket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Frames longer than this are dropped.
    pub max_frame_bytes: usize,

    /// Connections served at once; further clients wait in the backlog.
    pub max_connections: usize,

    /// Parsed frames buffered for the event loop before readers stop reading.
    pub queue_depth: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
            max_connections: 256,
            queue_depth: 64,
        }
    }
}

/// Domain advertisement configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdvertiserConfig {
    /// Connect to the discovery daemon on the system bus.
    pub enabled: bool,

    /// Fixed delay before retrying a failed or collided registration.
    pub retry_secs: u64,

    /// Limit on any single call to the discovery daemon.
    pub call_timeout_ms: u64,
}

impl Default for AdvertiserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_secs: 30,
            call_timeout_ms: 5_000,
        }
    }
}

impl AdvertiserConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A statically configured site.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    /// Unique site identifier.
    pub id: String,

    /// Domain name the site is served and advertised under.
    pub domain_name: String,

    /// Site type and its parameters.
    #[serde(flatten)]
    pub kind: SiteKind,
}

/// Supported site types.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SiteKind {
    /// Serve a local directory with listings, optionally over WebDAV.
    Directory {
        root: PathBuf,
        #[serde(default)]
        webdav: bool,
    },

    /// Serve a local directory as the document root with listings.
    Media { root: PathBuf },
}

impl SiteKind {
    /// Data directory the site serves.
    pub fn root(&self) -> &std::path::Path {
        match self {
            SiteKind::Directory { root, .. } | SiteKind::Media { root } => root,
        }
    }
}
