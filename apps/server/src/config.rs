use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PING_INTERVAL_SECS: u64 = 25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// `None` keeps pairings waiting for responses indefinitely.
    pub response_timeout: Option<Duration>,
    pub ping_interval: Duration,
    pub jwt_secret: Option<Vec<u8>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            response_timeout: None,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            jwt_secret: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_raw = read("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid {
                key: "BIND_ADDR",
                value: bind_raw.clone(),
            })?;

        let response_timeout = match read("RESPONSE_TIMEOUT_SECS") {
            Some(raw) => match parse_secs("RESPONSE_TIMEOUT_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => None,
        };

        let ping_interval = match read("WS_PING_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(parse_secs("WS_PING_INTERVAL_SECS", &raw)?.max(1)),
            None => Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
        };

        let jwt_secret = read("JWT_SECRET").map(String::into_bytes);
        if jwt_secret.is_none() {
            tracing::warn!(
                component = "config",
                "JWT_SECRET not set; join-room identities are trusted as supplied"
            );
        }

        Ok(Self {
            bind_addr,
            response_timeout,
            ping_interval,
            jwt_secret,
        })
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}
