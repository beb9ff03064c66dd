use std::time::Duration;

use url::Url;

use pulsear_types::{DEFAULT_SLICE_SIZE, UserConfig};

use crate::error::ClientError;

/// Runtime configuration of a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (`ws://` or `wss://`).
    pub server_url: Url,
    pub username: String,
    /// Worker Pool size; fixed for the lifetime of the client.
    pub worker_count: usize,
    pub slice_size: u64,
    pub heartbeat_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Snapshot sent with every heartbeat.
    pub user_config: UserConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse("ws://127.0.0.1:8080").expect("static url is valid"),
            username: String::new(),
            worker_count: 4,
            slice_size: DEFAULT_SLICE_SIZE,
            heartbeat_interval: Duration::from_secs(2),
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(600),
            user_config: UserConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Read `PULSEAR_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("PULSEAR_SERVER_URL") {
            config.server_url = Url::parse(&raw)
                .map_err(|e| ClientError::Config(format!("PULSEAR_SERVER_URL: {}", e)))?;
        }
        if let Ok(name) = std::env::var("PULSEAR_USERNAME") {
            config.username = name;
        }
        if let Some(n) = env_number("PULSEAR_WORKERS")? {
            config.worker_count = n as usize;
        }
        if let Some(n) = env_number("PULSEAR_SLICE_SIZE")? {
            config.slice_size = n;
        }
        if let Some(ms) = env_number("PULSEAR_HEARTBEAT_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number("PULSEAR_BACKOFF_INITIAL_MS")? {
            config.backoff_initial = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number("PULSEAR_BACKOFF_MAX_MS")? {
            config.backoff_max = Duration::from_millis(ms);
        }
        config.user_config.web_worker_num = config.worker_count as i32;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.worker_count == 0 {
            return Err(ClientError::Config("worker count must be at least 1".into()));
        }
        if self.slice_size == 0 {
            return Err(ClientError::Config("slice size must be positive".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ClientError::Config("heartbeat interval must be positive".into()));
        }
        if self.backoff_initial > self.backoff_max {
            return Err(ClientError::Config("initial backoff exceeds maximum".into()));
        }
        match self.server_url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(ClientError::Config(format!("unsupported scheme {}", other))),
        }
    }

    /// Endpoint used by the control channel and every worker connection.
    pub fn socket_url(&self) -> Result<Url, ClientError> {
        self.server_url
            .join("ws")
            .map_err(|e| ClientError::Config(format!("socket url: {}", e)))
    }
}

fn env_number(key: &str) -> Result<Option<u64>, ClientError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{} is not a number: {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slice_size, 40960);
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = ClientConfig {
            worker_count: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_rejects_http_scheme() {
        let config = ClientConfig {
            server_url: Url::parse("http://example.com").unwrap(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
