//! Directory site: listings under `/pub`, optional WebDAV under `/webdav`.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::fragments::{ConfigFragment, ModuleDeps};
use crate::sites::{check_data_dir, SiteBackend, SiteError};

pub struct DirectorySite {
    id: String,
    domain_name: String,
    data_dir: PathBuf,
    webdav: bool,
    /// Scratch directory; the web root and lock database live here.
    site_dir: PathBuf,
    listen_port: u16,
}

impl DirectorySite {
    pub fn new(
        id: String,
        domain_name: String,
        data_dir: PathBuf,
        webdav: bool,
        site_dir: PathBuf,
        listen_port: u16,
    ) -> Self {
        Self {
            id,
            domain_name,
            data_dir,
            webdav,
            site_dir,
            listen_port,
        }
    }

    fn web_root(&self) -> PathBuf {
        self.site_dir.join("webroot")
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> SiteError {
        SiteError::Io {
            site: self.id.clone(),
            path: path.to_path_buf(),
            source,
        }
    }

    fn link(&self, name: &str) -> Result<PathBuf, SiteError> {
        let link = self.web_root().join(name);
        symlink(&self.data_dir, &link).map_err(|e| self.io_error(&link, e))?;
        Ok(link)
    }

    fn segment(&self, pub_dir: &Path, webdav_dir: Option<&Path>) -> String {
        let web_root = self.web_root();
        let mut buf = String::new();
        buf.push_str(&format!("<VirtualHost *:{}>\n", self.listen_port));
        buf.push_str(&format!("    ServerName {}\n", self.domain_name));
        buf.push_str(&format!("    DocumentRoot \"{}\"\n", web_root.display()));
        if webdav_dir.is_some() {
            buf.push_str(&format!(
                "    DavLockDB \"{}\"\n",
                self.site_dir.join("DavLock").display()
            ));
        }
        buf.push_str(&format!("    <Directory \"{}\">\n", web_root.display()));
        buf.push_str("        Require all granted\n");
        buf.push_str("    </Directory>\n");
        buf.push_str(&format!("    <Directory \"{}\">\n", pub_dir.display()));
        buf.push_str("        Options Indexes\n");
        buf.push_str("        Require all granted\n");
        buf.push_str("    </Directory>\n");
        if let Some(dir) = webdav_dir {
            buf.push_str(&format!("    <Directory \"{}\">\n", dir.display()));
            buf.push_str("        Dav filesystem\n");
            buf.push_str("        Require all granted\n");
            buf.push_str("    </Directory>\n");
        }
        buf.push_str("</VirtualHost>\n");
        buf
    }
}

impl SiteBackend for DirectorySite {
    fn id(&self) -> &str {
        &self.id
    }

    fn domain_name(&self) -> &str {
        &self.domain_name
    }

    fn start(&mut self) -> Result<ConfigFragment, SiteError> {
        let web_root = self.web_root();
        // leftovers from an unclean exit
        self.stop()?;
        fs::create_dir_all(&web_root).map_err(|e| self.io_error(&web_root, e))?;
        check_data_dir(&self.data_dir).map_err(|e| self.io_error(&self.data_dir, e))?;

        let pub_dir = self.link("pub")?;
        let mut deps = ModuleDeps::new();
        let webdav_dir = if self.webdav {
            deps = deps
                .with("dav_module", "mod_dav.so")
                .with("dav_fs_module", "mod_dav_fs.so");
            Some(self.link("webdav")?)
        } else {
            None
        };

        tracing::info!(
            site = %self.id,
            domain = %self.domain_name,
            root = %self.data_dir.display(),
            webdav = self.webdav,
            "Site started"
        );
        Ok(ConfigFragment::new(
            self.segment(&pub_dir, webdav_dir.as_deref()),
            deps,
        ))
    }

    fn stop(&mut self) -> Result<(), SiteError> {
        match fs::remove_dir_all(&self.site_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(&self.site_dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(dir: &Path, webdav: bool) -> DirectorySite {
        let data = dir.join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("hello.txt"), b"hi").unwrap();
        DirectorySite::new(
            "pub".into(),
            "files.local".into(),
            data,
            webdav,
            dir.join("tmp/sites/pub"),
            8080,
        )
    }

    #[test]
    fn start_links_data_and_stop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = site(dir.path(), false);

        let fragment = site.start().unwrap();
        let pub_dir = dir.path().join("tmp/sites/pub/webroot/pub");
        assert_eq!(fs::read(pub_dir.join("hello.txt")).unwrap(), b"hi");
        assert!(!dir.path().join("tmp/sites/pub/webroot/webdav").exists());
        assert!(fragment.module_dependencies.is_empty());
        assert!(fragment
            .config_segment
            .starts_with("<VirtualHost *:8080>\n    ServerName files.local\n"));
        assert!(fragment.config_segment.contains("Options Indexes"));
        assert!(!fragment.config_segment.contains("Dav filesystem"));

        site.stop().unwrap();
        assert!(!dir.path().join("tmp/sites/pub").exists());
        assert!(dir.path().join("data/hello.txt").exists());
    }

    #[test]
    fn webdav_adds_modules_and_lock_db() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = site(dir.path(), true);

        let fragment = site.start().unwrap();
        assert_eq!(fragment.module_dependencies.get("dav_module"), Some("mod_dav.so"));
        assert_eq!(fragment.module_dependencies.get("dav_fs_module"), Some("mod_dav_fs.so"));
        assert!(fragment.config_segment.contains("Dav filesystem"));
        assert!(fragment.config_segment.contains("DavLockDB"));
        assert!(dir.path().join("tmp/sites/pub/webroot/webdav/hello.txt").exists());
    }

    #[test]
    fn missing_data_dir_fails_after_partial_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = DirectorySite::new(
            "pub".into(),
            "files.local".into(),
            dir.path().join("absent"),
            false,
            dir.path().join("tmp/sites/pub"),
            8080,
        );

        assert!(matches!(site.start(), Err(SiteError::Io { .. })));
        assert!(dir.path().join("tmp/sites/pub/webroot").exists());
        site.stop().unwrap();
        assert!(!dir.path().join("tmp/sites/pub").exists());
    }

    #[test]
    fn restart_replaces_stale_web_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = site(dir.path(), false);
        site.start().unwrap();
        site.start().unwrap();
        assert!(dir.path().join("tmp/sites/pub/webroot/pub/hello.txt").exists());
    }
}
