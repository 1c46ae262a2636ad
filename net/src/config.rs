//! Key server client configuration.

use std::time::Duration;

use regex::Regex;

use crate::NetError;

/// Settings for [`crate::KeyServerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Key server URIs, in declared order.
    pub servers: Vec<String>,
    /// Rotate requests across all servers instead of treating the
    /// first as primary and the rest as fallbacks.
    pub load_balance: bool,
    /// Per-connection connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout for the whole response.
    pub read_timeout: Duration,
    /// Optional outbound proxy.
    pub proxy: Option<ProxyConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: Vec::new(),
            load_balance: false,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            proxy: None,
        }
    }
}

/// An outbound HTTP proxy, with Maven-style `nonProxyHosts` globs.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// `http` or `https`.
    pub protocol: String,
    /// Hosts reached directly; `*` is the only metacharacter.
    pub non_proxy_hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Whether requests to `host` go through this proxy.
    pub fn applies_to(&self, host: &str) -> bool {
        !self
            .non_proxy_hosts
            .iter()
            .any(|glob| compile_glob(glob).is_match(host))
    }

    pub(crate) fn to_reqwest(&self) -> Result<reqwest::Proxy, NetError> {
        let url = format!("{}://{}:{}", self.protocol, self.host, self.port);
        let mut proxy = reqwest::Proxy::all(url.as_str()).map_err(|source| {
            NetError::Request {
                url: url.clone(),
                source,
            }
        })?;
        if let (Some(user), Some(password)) = (&self.username, &self.password) {
            proxy = proxy.basic_auth(user, password);
        }
        Ok(proxy)
    }
}

/// `*`-only glob, anchored, case-insensitive.
fn compile_glob(glob: &str) -> Regex {
    let mut pattern = String::from("(?i)^");
    for c in glob.chars() {
        if c == '*' {
            pattern.push_str(".*");
        } else {
            pattern.push_str(&regex::escape(&c.to_string()));
        }
    }
    pattern.push('$');
    Regex::new(&pattern).expect("escaped glob always compiles")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(non_proxy_hosts: &[&str]) -> ProxyConfig {
        ProxyConfig {
            host: "proxy.corp.example".to_string(),
            port: 3128,
            protocol: "http".to_string(),
            non_proxy_hosts: non_proxy_hosts.iter().map(|s| s.to_string()).collect(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn non_proxy_hosts_globs() {
        let p = proxy(&["*.internal.example", "localhost"]);
        assert!(!p.applies_to("keys.internal.example"));
        assert!(!p.applies_to("localhost"));
        assert!(p.applies_to("keyserver.ubuntu.com"));
    }

    #[test]
    fn defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.connect_timeout, Duration::from_secs(5));
        assert_eq!(c.read_timeout, Duration::from_secs(20));
        assert!(!c.load_balance);
    }
}
