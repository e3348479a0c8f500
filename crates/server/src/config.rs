// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Everything the coordinator needs lives here; there is no
// config file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FLUSH_DELAY_MS: u64 = 5_000;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Directory holding persisted room snapshots.
    pub data_dir: PathBuf,
    /// Debounce delay between a first accepted update and the durable
    /// snapshot write it schedules.
    pub flush_delay: Duration,
    /// Log filter directive (e.g. `info`, `sessionroom_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SESSIONROOM_HOST` | `0.0.0.0` |
    /// | `SESSIONROOM_PORT` | `8080` |
    /// | `SESSIONROOM_DATA_DIR` | `./data` |
    /// | `SESSIONROOM_FLUSH_DELAY_MS` | `5000` |
    /// | `SESSIONROOM_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("SESSIONROOM_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("SESSIONROOM_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let data_dir = env("SESSIONROOM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let flush_delay_ms: u64 = env("SESSIONROOM_FLUSH_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FLUSH_DELAY_MS);

        let log_filter = env("SESSIONROOM_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            data_dir,
            flush_delay: Duration::from_millis(flush_delay_ms),
            log_filter,
        }
    }
}
