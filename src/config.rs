//! Environment-resolved gateway configuration
//!
//! All settings are read once at startup and are immutable for the
//! lifetime of the process.

use hyper::Uri;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable for the listen port.
pub const ENV_PORT: &str = "PORT";
/// Environment variable for the upstream API origin.
pub const ENV_API_URL: &str = "API_URL";
/// Environment variable for the static asset root directory.
pub const ENV_STATIC_ROOT: &str = "STATIC_ROOT";
/// Environment variable for the SPA entry document within the asset root.
pub const ENV_SPA_INDEX: &str = "SPA_INDEX";
/// Environment variable for the bind address.
pub const ENV_BIND: &str = "BIND";

/// Errors produced while resolving the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: '{value}' is not a valid port number")]
    InvalidPort { name: &'static str, value: String },

    #[error("invalid {name} '{value}': {reason}")]
    InvalidUpstream {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid bind address '{bind}:{port}': {reason}")]
    InvalidBindAddress {
        bind: String,
        port: u16,
        reason: String,
    },
}

/// The upstream origin requests are forwarded to.
///
/// Parsed once from `API_URL`; only plain HTTP origins are accepted since
/// the gateway speaks cleartext HTTP to its upstream.
#[derive(Debug, Clone)]
pub struct Upstream {
    authority: String,
    host: String,
    port: u16,
}

impl Upstream {
    /// Parse an origin URL such as `http://localhost:3003`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUpstream {
            name: ENV_API_URL,
            value: value.to_string(),
            reason,
        };

        let uri: Uri = value
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| invalid(e.to_string()))?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(invalid(format!(
                    "unsupported scheme '{}', only http upstreams are supported",
                    other
                )))
            }
            None => return Err(invalid("missing scheme".to_string())),
        }

        let authority = uri
            .authority()
            .ok_or_else(|| invalid("missing host".to_string()))?;

        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(invalid(
                "origin must not carry a path or query".to_string(),
            ));
        }

        Ok(Self {
            authority: authority.to_string(),
            host: authority.host().to_string(),
            port: authority.port_u16().unwrap_or(80),
        })
    }

    /// The authority used when rewriting the Host header, e.g. `localhost:3003`.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The origin used to build forwarded request URIs.
    pub fn origin(&self) -> String {
        format!("http://{}", self.authority)
    }

    /// The `host:port` address for raw TCP connections (upgrade tunnels).
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Gateway configuration, resolved from the environment at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (default: 3002)
    pub port: u16,

    /// Bind address (default: 0.0.0.0, all interfaces)
    pub bind: String,

    /// Upstream origin for `/api` and `/ws` traffic
    pub upstream: Upstream,

    /// Root directory of the static SPA bundle
    pub static_root: PathBuf,

    /// Entry document served for unmatched paths, relative to the root
    pub spa_index: String,
}

impl Config {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Resolve the configuration through an arbitrary variable lookup.
    pub fn resolve(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match get(ENV_PORT) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort {
                name: ENV_PORT,
                value: raw,
            })?,
            None => default_port(),
        };

        let upstream = match get(ENV_API_URL) {
            Some(raw) => Upstream::parse(&raw)?,
            None => Upstream::parse(DEFAULT_API_URL).expect("default upstream origin is valid"),
        };

        Ok(Self {
            port,
            bind: get(ENV_BIND).unwrap_or_else(default_bind),
            upstream,
            static_root: get(ENV_STATIC_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(default_static_root),
            spa_index: get(ENV_SPA_INDEX).unwrap_or_else(default_spa_index),
        })
    }

    /// The socket address the gateway listens on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidBindAddress {
                bind: self.bind.clone(),
                port: self.port,
                reason: e.to_string(),
            })
    }
}

const DEFAULT_API_URL: &str = "http://localhost:3003";

fn default_port() -> u16 {
    3002
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_static_root() -> PathBuf {
    PathBuf::from("./dist")
}

fn default_spa_index() -> String {
    "index.html".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve_with(&[]).unwrap();
        assert_eq!(config.port, 3002);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.upstream.origin(), "http://localhost:3003");
        assert_eq!(config.static_root, PathBuf::from("./dist"));
        assert_eq!(config.spa_index, "index.html");
    }

    #[test]
    fn test_env_overrides() {
        let config = resolve_with(&[
            (ENV_PORT, "8080"),
            (ENV_API_URL, "http://api.internal:9000"),
            (ENV_STATIC_ROOT, "/srv/app/dist"),
            (ENV_SPA_INDEX, "app.html"),
            (ENV_BIND, "127.0.0.1"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.upstream.authority(), "api.internal:9000");
        assert_eq!(config.static_root, PathBuf::from("/srv/app/dist"));
        assert_eq!(config.spa_index, "app.html");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = resolve_with(&[(ENV_PORT, "not-a-port")]);
        assert!(matches!(result, Err(ConfigError::InvalidPort { .. })));
    }

    #[test]
    fn test_upstream_parsing() {
        let upstream = Upstream::parse("http://localhost:3003").unwrap();
        assert_eq!(upstream.authority(), "localhost:3003");
        assert_eq!(upstream.origin(), "http://localhost:3003");
        assert_eq!(upstream.addr(), "localhost:3003");

        // Port defaults to 80 for raw connections when the origin omits it
        let upstream = Upstream::parse("http://api.internal").unwrap();
        assert_eq!(upstream.authority(), "api.internal");
        assert_eq!(upstream.addr(), "api.internal:80");
    }

    #[test]
    fn test_upstream_rejects_https_and_paths() {
        assert!(Upstream::parse("https://api.internal").is_err());
        assert!(Upstream::parse("api.internal:3003").is_err());
        assert!(Upstream::parse("http://api.internal/v1").is_err());
        assert!(Upstream::parse("").is_err());
    }

    #[test]
    fn test_listen_addr() {
        let config = resolve_with(&[(ENV_BIND, "127.0.0.1"), (ENV_PORT, "4000")]).unwrap();
        let addr = config.listen_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:4000");

        let config = resolve_with(&[(ENV_BIND, "not an address")]).unwrap();
        assert!(matches!(
            config.listen_addr(),
            Err(ConfigError::InvalidBindAddress { .. })
        ));
    }
}
