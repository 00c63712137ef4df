//! Fragment producers.
//!
//! A producer turns a validated registration into the front-end text for one
//! virtual host. Producers must not fail for well-formed input.

use crate::fragments::fragment::{ConfigFragment, ModuleDeps};
use crate::registration::protocol::{ProxyTarget, Registration};

/// Renders a registration into a configuration fragment.
pub trait FragmentProducer: Send {
    fn produce(&self, registration: &Registration) -> ConfigFragment;
}

/// Reverse-proxies a domain to a loopback port.
#[derive(Debug, Clone)]
pub struct ReverseProxyProducer {
    /// Port the front end listens on; used in the `<VirtualHost>` address.
    listen_port: u16,
}

impl ReverseProxyProducer {
    pub fn new(listen_port: u16) -> Self {
        Self { listen_port }
    }
}

impl FragmentProducer for ReverseProxyProducer {
    fn produce(&self, registration: &Registration) -> ConfigFragment {
        let mut deps = ModuleDeps::new()
            .with("proxy_module", "mod_proxy.so")
            .with("proxy_http_module", "mod_proxy_http.so");

        let target = registration.target.upstream_url();
        let mut buf = String::new();
        buf.push_str(&format!("<VirtualHost *:{}>\n", self.listen_port));
        buf.push_str(&format!("    ServerName {}\n", registration.domain_name));
        if let ProxyTarget::Https(_) = registration.target {
            deps = deps.with("ssl_module", "mod_ssl.so");
            buf.push_str("    SSLProxyEngine on\n");
        }
        buf.push_str(&format!("    ProxyPass \"/\" \"{}\"\n", target));
        buf.push_str(&format!("    ProxyPassReverse \"/\" \"{}\"\n", target));
        buf.push_str("</VirtualHost>\n");

        ConfigFragment::new(buf, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_target_routes_to_loopback_port() {
        let registration = Registration {
            domain_name: "svc1.local".into(),
            target: ProxyTarget::Http(8080),
        };
        let fragment = ReverseProxyProducer::new(80).produce(&registration);

        assert!(fragment.config_segment.starts_with("<VirtualHost *:80>\n"));
        assert!(fragment.config_segment.contains("ServerName svc1.local\n"));
        assert!(fragment
            .config_segment
            .contains("ProxyPass \"/\" \"http://127.0.0.1:8080/\""));
        assert!(fragment
            .config_segment
            .contains("ProxyPassReverse \"/\" \"http://127.0.0.1:8080/\""));
        assert_eq!(fragment.module_dependencies.get("proxy_module"), Some("mod_proxy.so"));
        assert_eq!(fragment.module_dependencies.get("ssl_module"), None);
    }

    #[test]
    fn https_target_enables_ssl_proxy() {
        let registration = Registration {
            domain_name: "svc2.local".into(),
            target: ProxyTarget::Https(8443),
        };
        let fragment = ReverseProxyProducer::new(80).produce(&registration);

        assert!(fragment.config_segment.contains("SSLProxyEngine on"));
        assert!(fragment
            .config_segment
            .contains("\"https://127.0.0.1:8443/\""));
        assert_eq!(fragment.module_dependencies.get("ssl_module"), Some("mod_ssl.so"));
    }
}
