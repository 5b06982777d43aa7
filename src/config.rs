//! Environment-driven configuration, read once at startup.
//!
//! Follows the teacher's `RateLimitConfig::from_env()` pattern: plain
//! `env::var` lookups with hard-coded defaults, no config file or
//! builder crate.

use std::env;
use std::time::Duration;

pub struct Config {
    pub store_url: String,
    pub port: u16,
    pub bind_host: String,
    pub server_secret: Option<String>,
    pub admin_key: Option<String>,
    pub proxy_bearer_token: Option<String>,
    pub behind_proxy: bool,
    pub ca_cert_path: Option<String>,
    pub heartbeat_ttl: Duration,
    pub message_ttl: Duration,
    pub dev_mode: bool,
}

/// spec.md section 4.3 names these with a `C3PO_` prefix; section 6's
/// environment configuration table names them unprefixed. Both are
/// accepted, unprefixed taking precedence, matching the legacy-format
/// acceptance pattern used for the admin bearer token.
fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| env::var(n).ok()).filter(|s| !s.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let server_secret = env_first(&["SERVER_SECRET", "C3PO_SERVER_SECRET"]);
        let admin_key = env_first(&["ADMIN_KEY", "C3PO_ADMIN_KEY"]);
        let proxy_bearer_token = env_first(&["PROXY_BEARER_TOKEN", "C3PO_PROXY_BEARER_TOKEN"]);
        let dev_mode = server_secret.is_none() && admin_key.is_none() && proxy_bearer_token.is_none();

        Config {
            store_url: env::var("STORE_URL").unwrap_or_else(|_| "data/coordinator.db".to_string()),
            port: env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8000),
            bind_host: env::var("BIND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_secret,
            admin_key,
            proxy_bearer_token,
            behind_proxy: env::var("BEHIND_PROXY")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            ca_cert_path: env::var("CA_CERT_PATH").ok(),
            heartbeat_ttl: Duration::from_secs(
                env::var("HEARTBEAT_TTL").ok().and_then(|v| v.parse().ok()).unwrap_or(300),
            ),
            message_ttl: Duration::from_secs(
                env::var("MESSAGE_TTL").ok().and_then(|v| v.parse().ok()).unwrap_or(86_400),
            ),
            dev_mode,
        }
    }
}
