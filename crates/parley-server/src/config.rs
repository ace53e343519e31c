//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, PUBKEY_SIZE};
use parley_shared::token::parse_issuer_key;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Number of SQLite connections storage calls are spread over.
    /// Env: `DATABASE_POOL_SIZE`
    /// Default: `4`
    pub database_pool_size: usize,

    /// Ed25519 public key of the credential issuer (hex-encoded, 64 chars).
    /// Env: `TOKEN_ISSUER_PUBKEY`
    /// Default: all-zeros, which rejects every token.
    pub token_issuer_pubkey: [u8; PUBKEY_SIZE],

    /// Browser origin allowed by CORS.
    /// Env: `FRONTEND_URL`
    /// Default: unset (any origin).
    pub frontend_url: Option<String>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Token refill rate per second, for HTTP requests per IP and for
    /// inbound events per WebSocket connection.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Token bucket capacity.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            database_pool_size: 4,
            token_issuer_pubkey: [0u8; PUBKEY_SIZE],
            frontend_url: None,
            instance_name: "Parley Node".to_string(),
            admin_token: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(val) = var("DATABASE_POOL_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n >= 1 => config.database_pool_size = n,
                _ => tracing::warn!(value = %val, "Invalid DATABASE_POOL_SIZE, using default"),
            }
        }

        if let Some(hex_key) = var("TOKEN_ISSUER_PUBKEY") {
            match parse_issuer_key(&hex_key) {
                Ok(key) => config.token_issuer_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_ISSUER_PUBKEY, every connection will be anonymous"
                    );
                }
            }
        }

        if let Some(url) = var("FRONTEND_URL").filter(|u| !u.is_empty()) {
            config.frontend_url = Some(url);
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = var("ADMIN_TOKEN").filter(|t| !t.is_empty()) {
            config.admin_token = Some(token);
        }

        if let Some(val) = var("RATE_LIMIT_PER_SEC") {
            match val.parse::<f64>() {
                Ok(n) if n >= 0.0 => config.rate_limit_per_sec = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_SEC, using default"),
            }
        }

        if let Some(val) = var("RATE_LIMIT_BURST") {
            match val.parse::<f64>() {
                Ok(n) if n >= 1.0 => config.rate_limit_burst = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.token_issuer_pubkey, [0u8; 32]);
        assert!(config.admin_token.is_none());
        assert!(config.database_path.is_none());
        assert_eq!(config.database_pool_size, 4);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("TOKEN_ISSUER_PUBKEY", "ab".repeat(32).as_str()),
            ("FRONTEND_URL", "http://localhost:3000"),
            ("ADMIN_TOKEN", "secret"),
            ("DATABASE_PATH", "/tmp/parley.db"),
            ("RATE_LIMIT_BURST", "5"),
            ("DATABASE_POOL_SIZE", "8"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.token_issuer_pubkey, [0xab; 32]);
        assert_eq!(config.frontend_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/parley.db")));
        assert_eq!(config.rate_limit_burst, 5.0);
        assert_eq!(config.database_pool_size, 8);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "nope"),
            ("TOKEN_ISSUER_PUBKEY", "abcd"),
            ("ADMIN_TOKEN", ""),
            ("RATE_LIMIT_PER_SEC", "-3"),
            ("DATABASE_POOL_SIZE", "0"),
        ]));

        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.token_issuer_pubkey, [0u8; 32]);
        assert!(config.admin_token.is_none());
        assert_eq!(config.rate_limit_per_sec, 10.0);
        assert_eq!(config.database_pool_size, 4);
    }
}
