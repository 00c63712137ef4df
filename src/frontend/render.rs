//! Front-end document rendering.
//!
//! The generated file is fully determined by the layout and the merged
//! fragments, so rendering twice without a mutation gives identical bytes.

use std::path::PathBuf;

use crate::config::{FrontEndConfig, PathsConfig};
use crate::fragments::{MergedConfig, ModuleDeps, StoreError};

/// Everything outside the fragments that ends up in the document.
#[derive(Debug, Clone)]
pub struct DocumentLayout {
    pub modules_dir: PathBuf,
    pub base_modules: ModuleDeps,
    pub pid_file: PathBuf,
    pub error_log: PathBuf,
    pub access_log: PathBuf,
    pub root_dir: PathBuf,
    pub listen_ip: String,
    pub listen_port: u16,
}

impl DocumentLayout {
    pub fn new(paths: &PathsConfig, frontend: &FrontEndConfig) -> Self {
        Self {
            modules_dir: frontend.modules_dir.clone(),
            base_modules: frontend
                .base_modules
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            pid_file: paths.frontend_pid_file(),
            error_log: paths.log_dir.join("httpd-error.log"),
            access_log: paths.log_dir.join("httpd-access.log"),
            root_dir: paths.frontend_root(),
            listen_ip: frontend.listen_ip.clone(),
            listen_port: frontend.http_port,
        }
    }

    fn listen_directive(&self) -> String {
        if self.listen_ip == "0.0.0.0" {
            format!("Listen {} http", self.listen_port)
        } else if self.listen_ip.contains(':') {
            format!("Listen [{}]:{} http", self.listen_ip, self.listen_port)
        } else {
            format!("Listen {}:{} http", self.listen_ip, self.listen_port)
        }
    }
}

/// Render the complete document from the layout and merged fragments.
///
/// Base modules take part in conflict detection like any fragment.
pub fn render_document(
    layout: &DocumentLayout,
    merged: &MergedConfig,
) -> Result<String, StoreError> {
    let mut modules = layout.base_modules.clone();
    modules.absorb(&merged.deps)?;

    let mut buf = String::new();
    for (module, locator) in modules.iter() {
        buf.push_str(&format!(
            "LoadModule {} {}\n",
            module,
            layout.modules_dir.join(locator).display()
        ));
    }
    buf.push('\n');
    buf.push_str(&format!("PidFile \"{}\"\n", layout.pid_file.display()));
    buf.push_str(&format!("ErrorLog \"{}\"\n", layout.error_log.display()));
    buf.push_str(concat!(
        "LogFormat \"%h %l %u %t \\\"%r\\\" %>s %b ",
        "\\\"%{Referer}i\\\" \\\"%{User-Agent}i\\\"\" common\n",
    ));
    buf.push_str(&format!("CustomLog \"{}\" common\n", layout.access_log.display()));
    buf.push('\n');
    buf.push_str(&layout.listen_directive());
    buf.push_str("\n\n");
    buf.push_str("ServerName none\n");
    buf.push_str(&format!("DocumentRoot \"{}\"\n", layout.root_dir.display()));
    buf.push_str(&format!("<Directory \"{}\">\n", layout.root_dir.display()));
    buf.push_str("    Options Indexes\n");
    buf.push_str("    Require all granted\n");
    buf.push_str("</Directory>\n");
    buf.push('\n');
    buf.push_str(&merged.text);
    Ok(buf)
}
