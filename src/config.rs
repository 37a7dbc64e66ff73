//! Server configuration.
//!
//! [`ServerConfig`] is built once by [`ServerConfigBuilder`] and is immutable
//! afterwards. Every option has a documented default:
//!
//! | Option | Default | Effect |
//! |---|---|---|
//! | `address` | `:8443` | `host:port` listen address, resolved at start; `:port` binds all interfaces |
//! | `tls` | none | required to start or report an endpoint |
//! | `timeout` | 1s | per-request deadline; zero means cancel-only |
//! | `shutdown_timeout` | 5s | how long `start` drains connections after `stop` |
//! | `strict_slash` | `true` | redirect `/a/` ↔ `/a` when only the other is routed |
//! | `path_prefix` | empty | prefix applied to every route registered on the server |
//! | `filters` | none | global filters, outermost first |
//! | codecs | JSON | request decoder, response encoder, error encoder |
//! | `not_found` / `method_not_allowed` | plain 404 / 405 | fallback services |

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Codecs, ErrorEncoder, RequestDecoder, ResponseEncoder};
use crate::error::Error;
use crate::filter::{Filter, Service};
use crate::tls;

/// Validated, immutable server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) address: String,
    pub(crate) port: u16,
    pub(crate) tls: Option<Arc<rustls::ServerConfig>>,
    pub(crate) timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) strict_slash: bool,
    pub(crate) path_prefix: String,
    pub(crate) filters: Vec<Filter>,
    pub(crate) codecs: Codecs,
    pub(crate) not_found: Option<Service>,
    pub(crate) method_not_allowed: Option<Service>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn address(&self) -> &str { &self.address }
    pub fn port(&self) -> u16 { self.port }
    pub fn timeout(&self) -> Duration { self.timeout }
    pub fn shutdown_timeout(&self) -> Duration { self.shutdown_timeout }
    pub fn strict_slash(&self) -> bool { self.strict_slash }
    pub fn path_prefix(&self) -> &str { &self.path_prefix }
    pub fn has_tls(&self) -> bool { self.tls.is_some() }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("tls", &self.tls.is_some())
            .field("timeout", &self.timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("strict_slash", &self.strict_slash)
            .field("path_prefix", &self.path_prefix)
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerConfig`].
///
/// ```rust
/// use std::time::Duration;
/// use portico::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .address("127.0.0.1:9443")
///     .timeout(Duration::from_millis(500))
///     .path_prefix("/api")
///     .build()
///     .unwrap();
/// assert_eq!(config.address(), "127.0.0.1:9443");
/// assert_eq!(config.port(), 9443);
/// assert!(!config.has_tls());
/// ```
#[derive(Clone)]
pub struct ServerConfigBuilder {
    address: String,
    tls: Option<Arc<rustls::ServerConfig>>,
    tls_files: Option<(PathBuf, PathBuf)>,
    timeout: Duration,
    shutdown_timeout: Duration,
    strict_slash: bool,
    path_prefix: String,
    filters: Vec<Filter>,
    codecs: Codecs,
    not_found: Option<Service>,
    method_not_allowed: Option<Service>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            address: String::from(":8443"),
            tls: None,
            tls_files: None,
            timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            strict_slash: true,
            path_prefix: String::new(),
            filters: Vec::new(),
            codecs: Codecs::default(),
            not_found: None,
            method_not_allowed: None,
        }
    }
}

impl ServerConfigBuilder {
    /// Starts from the defaults and applies environment overrides:
    ///
    /// | Variable | Option |
    /// |----------|--------|
    /// | `PORTICO_ADDRESS` | `address` |
    /// | `PORTICO_TIMEOUT_MS` | `timeout` in milliseconds |
    /// | `PORTICO_STRICT_SLASH` | `strict_slash` (`1`/`true`) |
    /// | `PORTICO_TLS_CERT` + `PORTICO_TLS_KEY` | PEM files for `tls` |
    pub fn from_env() -> Result<Self, Error> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(v) = lookup("PORTICO_ADDRESS") {
            self.address = v;
        }
        if let Some(v) = lookup("PORTICO_TIMEOUT_MS") {
            let ms = v
                .parse::<u64>()
                .map_err(|_| Error::InvalidSetting { key: "PORTICO_TIMEOUT_MS", value: v.clone() })?;
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("PORTICO_STRICT_SLASH") {
            self.strict_slash = parse_bool(&v);
        }
        match (lookup("PORTICO_TLS_CERT"), lookup("PORTICO_TLS_KEY")) {
            (Some(cert), Some(key)) => self.tls_files = Some((cert.into(), key.into())),
            (None, None) => {}
            (Some(_), None) => {
                return Err(Error::InvalidSetting { key: "PORTICO_TLS_KEY", value: String::new() });
            }
            (None, Some(_)) => {
                return Err(Error::InvalidSetting { key: "PORTICO_TLS_CERT", value: String::new() });
            }
        }
        Ok(self)
    }

    /// `host:port`, or `:port` for all interfaces. The host may be a name,
    /// an IPv4 address or a bracketed IPv6 address; names are resolved when
    /// the server starts.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// TLS configuration. ALPN is set to `h2, http/1.1` unless already set.
    pub fn tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// PEM certificate chain and key, loaded by [`build`](Self::build).
    pub fn tls_pem_files(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls_files = Some((cert.into(), key.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn strict_slash(mut self, strict: bool) -> Self {
        self.strict_slash = strict;
        self
    }

    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    /// Replaces the global filters.
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters = filters.into_iter().collect();
        self
    }

    pub fn request_decoder(mut self, decoder: RequestDecoder) -> Self {
        self.codecs.decoder = decoder;
        self
    }

    pub fn response_encoder(mut self, encoder: ResponseEncoder) -> Self {
        self.codecs.encoder = encoder;
        self
    }

    pub fn error_encoder(mut self, encoder: ErrorEncoder) -> Self {
        self.codecs.error = encoder;
        self
    }

    pub fn not_found(mut self, service: Service) -> Self {
        self.not_found = Some(service);
        self
    }

    pub fn method_not_allowed(mut self, service: Service) -> Self {
        self.method_not_allowed = Some(service);
        self
    }

    /// Validates the address and loads PEM files if any were given.
    ///
    /// A missing TLS configuration is not an error here; the server reports it
    /// from `start` and `endpoint`.
    pub fn build(self) -> Result<ServerConfig, Error> {
        let (address, port) = parse_address(&self.address)?;
        let tls = match (self.tls, self.tls_files) {
            (Some(config), _) => Some(tls::with_alpn(config)),
            (None, Some((cert, key))) => Some(tls::load_pem_files(&cert, &key)?),
            (None, None) => None,
        };
        Ok(ServerConfig {
            address,
            port,
            tls,
            timeout: self.timeout,
            shutdown_timeout: self.shutdown_timeout,
            strict_slash: self.strict_slash,
            path_prefix: self.path_prefix,
            filters: self.filters,
            codecs: self.codecs,
            not_found: self.not_found,
            method_not_allowed: self.method_not_allowed,
        })
    }
}

/// Checks the shape of `host:port` and fills in `0.0.0.0` for `:port`.
fn parse_address(address: &str) -> Result<(String, u16), Error> {
    let invalid = |reason| Error::InvalidAddress { address: address.to_owned(), reason };

    let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
    if host.is_empty() {
        return Ok((format!("0.0.0.0:{port}"), port));
    }
    url::Host::parse(host).map_err(|_| invalid("invalid host"))?;
    Ok((address.to_owned(), port))
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
