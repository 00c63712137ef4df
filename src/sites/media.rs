//! Media site: the data directory is the document root, with listings.

use std::path::PathBuf;

use crate::fragments::{ConfigFragment, ModuleDeps};
use crate::sites::{check_data_dir, SiteBackend, SiteError};

pub struct MediaSite {
    id: String,
    domain_name: String,
    data_dir: PathBuf,
    listen_port: u16,
}

impl MediaSite {
    pub fn new(id: String, domain_name: String, data_dir: PathBuf, listen_port: u16) -> Self {
        Self {
            id,
            domain_name,
            data_dir,
            listen_port,
        }
    }

    fn segment(&self) -> String {
        let root = self.data_dir.display();
        let mut buf = String::new();
        buf.push_str(&format!("<VirtualHost *:{}>\n", self.listen_port));
        buf.push_str(&format!("    ServerName {}\n", self.domain_name));
        buf.push_str(&format!("    DocumentRoot \"{}\"\n", root));
        buf.push_str(&format!("    <Directory \"{}\">\n", root));
        buf.push_str("        Options Indexes\n");
        buf.push_str("        Require all granted\n");
        buf.push_str("    </Directory>\n");
        buf.push_str("</VirtualHost>\n");
        buf
    }
}

impl SiteBackend for MediaSite {
    fn id(&self) -> &str {
        &self.id
    }

    fn domain_name(&self) -> &str {
        &self.domain_name
    }

    fn start(&mut self) -> Result<ConfigFragment, SiteError> {
        check_data_dir(&self.data_dir).map_err(|source| SiteError::Io {
            site: self.id.clone(),
            path: self.data_dir.clone(),
            source,
        })?;

        tracing::info!(
            site = %self.id,
            domain = %self.domain_name,
            root = %self.data_dir.display(),
            "Site started"
        );
        Ok(ConfigFragment::new(self.segment(), ModuleDeps::new()))
    }

    /// Nothing is provisioned, so nothing is removed.
    fn stop(&mut self) -> Result<(), SiteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn serves_data_dir_directly() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("music");
        fs::create_dir_all(&data).unwrap();
        let mut site = MediaSite::new("music".into(), "music.local".into(), data.clone(), 8080);

        let fragment = site.start().unwrap();
        assert!(fragment.module_dependencies.is_empty());
        let segment = &fragment.config_segment;
        assert!(segment.starts_with("<VirtualHost *:8080>\n    ServerName music.local\n"));
        assert!(segment.contains(&format!("DocumentRoot \"{}\"", data.display())));
        assert!(segment.contains("Options Indexes"));

        site.stop().unwrap();
        assert!(data.exists());
    }

    #[test]
    fn missing_data_dir_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        let mut missing =
            MediaSite::new("m".into(), "m.local".into(), dir.path().join("absent"), 80);
        assert!(matches!(missing.start(), Err(SiteError::Io { .. })));

        let mut not_dir = MediaSite::new("m".into(), "m.local".into(), file, 80);
        assert!(matches!(not_dir.start(), Err(SiteError::Io { .. })));
    }
}
