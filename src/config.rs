use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::exec::Backpressure;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "SWITCHYARD_CONFIG";
/// Environment variable overriding `server.listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub worker_pool: Option<WorkerPoolConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub websocket: WebSocketConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Per-connection HTTP timeouts, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Finishing a request once its first bytes arrived.
    pub read_secs: u64,
    pub write_secs: u64,
    /// Waiting for the next request on a kept-alive connection.
    pub idle_secs: u64,
    /// Writing the `101` that completes a WebSocket upgrade.
    pub handshake_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_secs: 10,
            write_secs: 10,
            idle_secs: 90,
            handshake_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPoolConfig {
    pub size: usize,
    #[serde(default)]
    pub backpressure: Backpressure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_tokens: u32,
    pub refill_interval_ms: u64,
}

impl RateLimitConfig {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Zero disables keepalive pings.
    pub ping_interval_secs: u64,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_size: u64,
    pub write_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            inbound_capacity: 256,
            outbound_capacity: 256,
            max_frame_size: 16 * 1024 * 1024,
            write_timeout_secs: 10,
        }
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration, reading variables through `lookup`.
    ///
    /// The file named by `SWITCHYARD_CONFIG` is read when set; otherwise
    /// defaults apply. `LISTEN` then overrides the listen address.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut cfg = match lookup(CONFIG_PATH_ENV) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                Self::from_yaml(&raw).with_context(|| format!("parsing config file {path}"))?
            }
            None => Self::default(),
        };

        if let Some(addr) = lookup(LISTEN_ENV) {
            cfg.server.listen_addr = addr;
        }

        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let cfg = serde_yaml::from_str(raw)?;
        Ok(cfg)
    }
}
