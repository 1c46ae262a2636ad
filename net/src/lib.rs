//! Fetching public keys over the network.
//!
//! Key servers speak the [HKP] protocol over HTTP (`hkp://`, default
//! port 11371) or HTTPS (`hkps://`).  A [`KeyServerClient`] holds an
//! ordered list of servers and fetches a key by id with per-host
//! address failover ([`router::RoundRobinRouter`]), transient-failure
//! retry with back-off ([`retry::RetryStrategy`]) and optional proxy
//! support.
//!
//! A 404 from any server is the canonical "key does not exist" answer
//! and ends the whole fetch; remaining servers are not asked.
//!
//! [HKP]: https://tools.ietf.org/html/draft-shaw-openpgp-hkp-00

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};
use url::Url;
use vouch_pgp::KeyId;

pub mod config;
pub mod retry;
pub mod router;

pub use config::{ClientConfig, ProxyConfig};
pub use retry::RetryStrategy;
pub use router::RoundRobinRouter;

/// Errors returned from the network routines.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NetError {
    /// The requested key was not found on any server.
    #[error("Key not found")]
    KeyNotFound,

    /// A key server URI used a scheme other than hkp/hkps/http/https.
    #[error("unsupported key server protocol in {0:?}")]
    UnsupportedProtocol(String),

    /// A key server URI could not be parsed.
    #[error("malformed key server URI {0:?}")]
    MalformedUri(String),

    /// No key servers were configured at all.
    #[error("no key servers configured")]
    NoServers,

    /// An HTTP status that is neither success nor 404.
    #[error("key server returned HTTP status {0}")]
    Status(u16),

    /// The host name did not resolve.
    #[error("cannot resolve key server host {host}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP request itself failed.
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Every address of a host was tried without success.
    #[error("all addresses of {host} failed; last error: {last}")]
    HostExhausted { host: String, last: Box<NetError> },
}

impl NetError {
    /// Whether another attempt could plausibly succeed: timeouts,
    /// refused connections and gateway-style statuses.  Client errors
    /// other than 408 and TLS failures are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Status(code) => matches!(code, 408 | 500 | 502 | 503 | 504),
            NetError::Request { source, .. } => {
                if is_tls_failure(source) {
                    return false;
                }
                source.is_timeout() || source.is_connect()
            }
            NetError::HostExhausted { .. } => true,
            _ => false,
        }
    }
}

/// reqwest folds TLS handshake problems into its connect errors, so
/// the source chain is scanned for certificate trouble.
fn is_tls_failure(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        let rendered = inner.to_string().to_ascii_lowercase();
        if rendered.contains("certificate")
            || rendered.contains("handshake")
            || rendered.contains("tls")
        {
            return true;
        }
        source = inner.source();
    }
    false
}

/// One prepared key server: scheme normalized, port made explicit.
#[derive(Debug, Clone)]
pub struct KeyServerUri {
    base: Url,
    host: String,
    port: u16,
}

impl KeyServerUri {
    /// Normalizes `hkp`/`hkps` URIs: `hkp` is HTTP on port 11371
    /// unless one is given, `hkps` is HTTPS on 443.  Plain `http` and
    /// `https` pass through; anything else is rejected.
    pub fn prepare(uri: &str) -> Result<Self, NetError> {
        let parsed =
            Url::parse(uri).map_err(|_| NetError::MalformedUri(uri.to_string()))?;
        let (scheme, default_port) = match parsed.scheme() {
            "hkp" => ("http", 11371),
            "http" => ("http", 80),
            "hkps" | "https" => ("https", 443),
            _ => return Err(NetError::UnsupportedProtocol(uri.to_string())),
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| NetError::MalformedUri(uri.to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(default_port);
        let base = Url::parse(&format!("{}://{}:{}", scheme, host, port))
            .map_err(|_| NetError::MalformedUri(uri.to_string()))?;
        Ok(KeyServerUri { base, host, port })
    }

    /// `GET /pks/lookup?op=get&options=mr&search=0x<16-hex>`.
    pub fn lookup_url(&self, key_id: &KeyId) -> Url {
        let mut url = self.base.clone();
        url.set_path("/pks/lookup");
        url.set_query(Some(&format!(
            "op=get&options=mr&search=0x{:016X}",
            key_id.long_id()
        )));
        url
    }

    /// Human-facing key page on this server.
    pub fn show_url(&self, fingerprint_hex: &str) -> String {
        format!(
            "{}://{}/pks/lookup?op=vindex&fingerprint=on&search=0x{}",
            self.base.scheme(),
            self.host,
            fingerprint_hex
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// HKP/HKPS client over one or more key servers.
pub struct KeyServerClient {
    servers: Vec<KeyServerUri>,
    config: ClientConfig,
    retry: RetryStrategy,
    router: RoundRobinRouter,
    /// Rotation start for load-balanced fetches.
    next_server: AtomicUsize,
    /// One HTTP client per (host, pinned address); cloning a client
    /// is cheap, building one is not.
    clients: Mutex<HashMap<(String, Option<SocketAddr>), reqwest::blocking::Client>>,
}

impl KeyServerClient {
    pub fn new(config: ClientConfig) -> Result<Self, NetError> {
        let servers = config
            .servers
            .iter()
            .map(|uri| KeyServerUri::prepare(uri))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KeyServerClient {
            servers,
            config,
            retry: RetryStrategy::default(),
            router: RoundRobinRouter::new(),
            next_server: AtomicUsize::new(0),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the retry policy (tests use tighter budgets).
    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    /// Key page URL on the primary server, for diagnostics.
    pub fn key_show_url(&self, fingerprint_hex: &str) -> Option<String> {
        self.servers.first().map(|s| s.show_url(fingerprint_hex))
    }

    /// Fetches the (usually armored) key ring bytes for `key_id`.
    ///
    /// Servers are tried in declared order, or rotated when load
    /// balancing; a 404 anywhere ends the fetch as
    /// [`NetError::KeyNotFound`].
    pub fn fetch(&self, key_id: &KeyId) -> Result<Vec<u8>, NetError> {
        if self.servers.is_empty() {
            return Err(NetError::NoServers);
        }
        let start = if self.config.load_balance {
            self.next_server.fetch_add(1, Ordering::Relaxed) % self.servers.len()
        } else {
            0
        };

        let mut last = None;
        for offset in 0..self.servers.len() {
            let server = &self.servers[(start + offset) % self.servers.len()];
            match self.fetch_from(server, key_id) {
                Ok(body) => return Ok(body),
                Err(NetError::KeyNotFound) => return Err(NetError::KeyNotFound),
                Err(error) => {
                    warn!(server = %server.base, %error, "key server failed; trying next");
                    last = Some(error);
                }
            }
        }
        Err(last.expect("at least one server was tried"))
    }

    /// Tries every resolved address of one server.
    fn fetch_from(
        &self,
        server: &KeyServerUri,
        key_id: &KeyId,
    ) -> Result<Vec<u8>, NetError> {
        let proxied = self
            .config
            .proxy
            .as_ref()
            .is_some_and(|p| p.applies_to(&server.host));
        if proxied {
            // The proxy resolves the host; address pinning would be
            // meaningless.
            return self
                .retry
                .run(&server.host, |_| self.request(server, None, key_id));
        }

        let address_count = self.router.address_count(&server.host)?;
        let mut last = None;
        for _ in 0..address_count {
            let addr = self.router.next_address(&server.host, server.port)?;
            debug!(host = %server.host, %addr, "fetching key");
            match self
                .retry
                .run(&server.host, |_| self.request(server, Some(addr), key_id))
            {
                Ok(body) => return Ok(body),
                Err(error @ NetError::KeyNotFound) => return Err(error),
                Err(error) if error.is_retryable() => {
                    self.router.mark_error(&server.host, addr.ip());
                    last = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(NetError::HostExhausted {
            host: server.host.clone(),
            last: Box::new(last.expect("at least one address was tried")),
        })
    }

    /// One HTTP request, optionally pinned to a resolved address.
    fn request(
        &self,
        server: &KeyServerUri,
        addr: Option<SocketAddr>,
        key_id: &KeyId,
    ) -> Result<Vec<u8>, NetError> {
        let url = server.lookup_url(key_id);
        let client = self.client_for(server, addr)?;
        let response = client
            .get(url.clone())
            .send()
            .map_err(|source| NetError::Request {
                url: url.to_string(),
                source,
            })?;
        match response.status().as_u16() {
            200 => response
                .bytes()
                .map(|body| body.to_vec())
                .map_err(|source| NetError::Request {
                    url: url.to_string(),
                    source,
                }),
            404 => Err(NetError::KeyNotFound),
            code => Err(NetError::Status(code)),
        }
    }

    fn client_for(
        &self,
        server: &KeyServerUri,
        addr: Option<SocketAddr>,
    ) -> Result<reqwest::blocking::Client, NetError> {
        let key = (server.host.clone(), addr);
        if let Some(client) = self.clients.lock().unwrap().get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.read_timeout);
        if let Some(addr) = addr {
            builder = builder.resolve(&server.host, addr);
        }
        if let Some(proxy) = &self.config.proxy {
            if proxy.applies_to(&server.host) {
                builder = builder.proxy(proxy.to_reqwest()?);
            }
        }
        let client = builder.build().map_err(|source| NetError::Request {
            url: server.base.to_string(),
            source,
        })?;
        self.clients.lock().unwrap().insert(key, client.clone());
        Ok(client)
    }
}
