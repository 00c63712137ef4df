//! Statically configured sites.
//!
//! Each `[[sites]]` entry becomes a [`SiteBackend`] selected by its `kind`
//! tag: `directory` (listings under `/pub`, optional WebDAV) or `media`
//! (the data directory itself as document root). The orchestrator starts
//! sites before the front end (so their fragments are in the first document)
//! and stops them after it.

pub mod directory;
pub mod media;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{PathsConfig, SiteConfig, SiteKind};
use crate::fragments::ConfigFragment;
use crate::registration::protocol::normalize_domain;

pub use directory::DirectorySite;
pub use media::MediaSite;

/// Errors provisioning or tearing down a site.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("site {site}: {path}: {source}")]
    Io {
        site: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("site {site}: invalid domain name {domain:?}")]
    InvalidDomain { site: String, domain: String },
}

/// A site with its own web root and virtual host.
pub trait SiteBackend: Send {
    fn id(&self) -> &str;

    /// ASCII-compatible domain name the site answers to.
    fn domain_name(&self) -> &str;

    /// Store id of the site's fragment.
    fn fragment_id(&self) -> String {
        format!("site-{}", self.id())
    }

    /// Provision the web root and return the site's fragment.
    fn start(&mut self) -> Result<ConfigFragment, SiteError>;

    /// Remove everything `start` created.
    fn stop(&mut self) -> Result<(), SiteError>;
}

/// Build the backend for one configured site.
pub fn build_site(
    config: &SiteConfig,
    paths: &PathsConfig,
    listen_port: u16,
) -> Result<Box<dyn SiteBackend>, SiteError> {
    let domain_name = normalize_domain(&config.domain_name).map_err(|_| SiteError::InvalidDomain {
        site: config.id.clone(),
        domain: config.domain_name.clone(),
    })?;

    match &config.kind {
        SiteKind::Directory { root, webdav } => Ok(Box::new(DirectorySite::new(
            config.id.clone(),
            domain_name,
            root.clone(),
            *webdav,
            paths.site_dir(&config.id),
            listen_port,
        ))),
        SiteKind::Media { root } => Ok(Box::new(MediaSite::new(
            config.id.clone(),
            domain_name,
            root.clone(),
            listen_port,
        ))),
    }
}

/// Fail unless `path` is an existing directory.
pub(crate) fn check_data_dir(path: &Path) -> std::io::Result<()> {
    if std::fs::metadata(path)?.is_dir() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a directory",
        ))
    }
}
